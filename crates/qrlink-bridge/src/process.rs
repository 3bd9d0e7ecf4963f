//! Pairing backend hosted in an external bridge process.
//!
//! The bridge wraps the WhatsApp Web library. qrlink spawns it with piped
//! stdin/stdout, writes a `connect` command, and then reads lifecycle events
//! line by line. See [`crate::protocol`] for the wire format. The bridge's
//! stderr is forwarded into the log, and its last error line is reported
//! if the process exits on its own.

use crate::protocol::{BridgeCommand, BridgeEvent};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use qrlink_core::error::PairError;
use qrlink_core::event::{BackendEvent, OutgoingFile};
use qrlink_core::traits::{ConnectRequest, PairingBackend, PairingConnection};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum time to wait for the bridge to acknowledge a send.
const BRIDGE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long `close` waits for the process to exit after the kill.
const BRIDGE_EXIT_WAIT_SECS: u64 = 5;

/// Budget for the `close` line before the process is killed regardless.
const BRIDGE_CLOSE_WRITE_MS: u64 = 500;

/// How long to wait for stderr to drain once stdout has ended.
const BRIDGE_STDERR_DRAIN_MS: u64 = 500;

/// Spawns one bridge process per connection.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    command: String,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(cfg: &qrlink_core::config::BackendConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.args.clone())
    }
}

#[async_trait]
impl PairingBackend for ProcessBackend {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn PairingConnection>, PairError> {
        debug!(
            "bridge: spawning {} {} for {}",
            self.command,
            self.args.join(" "),
            request.storage.display()
        );

        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PairError::Backend(format!("failed to spawn '{}': {e}", self.command)))?;

        let stdin = BufWriter::new(
            child
                .stdin
                .take()
                .ok_or_else(|| PairError::Backend("bridge has no stdin".into()))?,
        );
        let stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| PairError::Backend("bridge has no stdout".into()))?,
        )
        .lines();
        let stderr = child.stderr.take().map(drain_stderr);

        let mut conn = ProcessConnection {
            child,
            stdin,
            stdout,
            stderr,
            next_id: 1,
            pending: VecDeque::new(),
            closed: false,
        };

        let storage = request.storage.to_string_lossy();
        let identity = &request.identity;
        conn.write(&BridgeCommand::Connect {
            storage: storage.as_ref(),
            browser: [
                identity.platform.as_str(),
                identity.browser.as_str(),
                identity.version.as_str(),
            ],
            version: request.version.0,
            connect_timeout_ms: u64::try_from(request.connect_timeout.as_millis())
                .unwrap_or(u64::MAX),
        })
        .await?;

        Ok(Box::new(conn))
    }
}

/// One running bridge process.
pub struct ProcessConnection {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
    /// Resolves to the most telling stderr line once the bridge closes stderr.
    stderr: Option<JoinHandle<Option<String>>>,
    next_id: u64,
    /// Lifecycle events read while waiting for a send acknowledgement.
    pending: VecDeque<BackendEvent>,
    closed: bool,
}

impl ProcessConnection {
    async fn write(&mut self, cmd: &BridgeCommand<'_>) -> Result<(), PairError> {
        let mut line = serde_json::to_string(cmd)
            .map_err(|e| PairError::Backend(format!("failed to encode command: {e}")))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read the next parseable bridge line. `None` at end of stream.
    async fn read_event(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(raw)) => {
                    if let Some(ev) = BridgeEvent::parse_line(&raw) {
                        return Some(ev);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!("bridge: stdout read failed: {e}");
                    return None;
                }
            }
        }
    }

    /// After stdout ends, turn the bridge's last words into a failure event.
    /// Reported once; `None` when the bridge said nothing on stderr.
    async fn exit_report(&mut self) -> Option<BackendEvent> {
        let drain = self.stderr.take()?;
        match tokio::time::timeout(Duration::from_millis(BRIDGE_STDERR_DRAIN_MS), drain).await {
            Ok(Ok(Some(line))) => Some(BackendEvent::Failed(format!("bridge exited: {line}"))),
            _ => None,
        }
    }

    /// Read until the acknowledgement for `id` arrives, buffering lifecycle
    /// events seen on the way.
    async fn await_ack(&mut self, id: u64) -> Result<(), PairError> {
        loop {
            let ev = self
                .read_event()
                .await
                .ok_or_else(|| PairError::Backend("bridge stdout closed".into()))?;
            match ev {
                BridgeEvent::Sent { id: got } if got == id => return Ok(()),
                BridgeEvent::Error {
                    id: Some(got),
                    message,
                } if got == id => return Err(PairError::Delivery(message)),
                other => {
                    if let Some(lifecycle) = other.into_lifecycle() {
                        self.pending.push_back(lifecycle);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PairingConnection for ProcessConnection {
    async fn next_event(&mut self) -> Option<BackendEvent> {
        if let Some(ev) = self.pending.pop_front() {
            return Some(ev);
        }
        loop {
            let Some(ev) = self.read_event().await else {
                return self.exit_report().await;
            };
            match ev.into_lifecycle() {
                Some(lifecycle) => return Some(lifecycle),
                None => debug!("bridge: skipping non-lifecycle line"),
            }
        }
    }

    async fn send_file(&mut self, to: &str, file: &OutgoingFile) -> Result<(), PairError> {
        let id = self.next_id;
        self.next_id += 1;

        self.write(&BridgeCommand::SendFile {
            id,
            to,
            file_name: file.file_name.as_str(),
            mimetype: file.mime_type.as_str(),
            caption: file.caption.as_str(),
            data: BASE64.encode(&file.data),
        })
        .await?;

        match tokio::time::timeout(
            Duration::from_secs(BRIDGE_REQUEST_TIMEOUT_SECS),
            self.await_ack(id),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(PairError::Delivery(format!(
                "bridge did not acknowledge send within {BRIDGE_REQUEST_TIMEOUT_SECS}s"
            ))),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Ask politely, but a bridge that stopped reading stdin must not
        // hold up the kill.
        let polite = tokio::time::timeout(
            Duration::from_millis(BRIDGE_CLOSE_WRITE_MS),
            self.write(&BridgeCommand::Close),
        )
        .await;
        if polite.is_err() {
            debug!("bridge: stdin blocked, killing without close");
        }
        let _ = self.child.start_kill();

        tokio::select! {
            _ = self.child.wait() => {}
            _ = tokio::time::sleep(Duration::from_secs(BRIDGE_EXIT_WAIT_SECS)) => {
                warn!("bridge: process did not exit after kill");
            }
        }
    }
}

/// Forward stderr lines into the log. Resolves to the first line that looks
/// like an error, else the last non-blank line.
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut first_error = None;
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            warn!("bridge stderr: {line}");
            if first_error.is_none() && line.to_ascii_lowercase().contains("error") {
                first_error = Some(line.clone());
            }
            last = Some(line);
        }
        first_error.or(last)
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use qrlink_core::event::{
        CloseReason, ConnectionState, IdentityProfile, ProtocolVersion,
    };

    fn sh(script: &str) -> ProcessBackend {
        ProcessBackend::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn request(dir: &std::path::Path) -> ConnectRequest {
        ConnectRequest {
            storage: dir.to_path_buf(),
            identity: IdentityProfile::default(),
            version: ProtocolVersion::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("/definitely/not/a/bridge", Vec::new());
        let err = backend.connect(request(dir.path())).await.err().unwrap();
        assert!(matches!(err, PairError::Backend(_)));
    }

    #[tokio::test]
    async fn test_events_streamed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sh(r#"read connect
echo 'booting bridge'
echo '{"event":"qr","qr":"tok-1"}'
echo '{"event":"connection","state":"connecting"}'
echo '{"event":"creds.update"}'
echo '{"event":"connection","state":"close","reason":"loggedOut"}'
"#);
        let mut conn = backend.connect(request(dir.path())).await.unwrap();
        assert_eq!(
            conn.next_event().await,
            Some(BackendEvent::ChallengeIssued("tok-1".to_string()))
        );
        assert_eq!(conn.next_event().await, Some(BackendEvent::CredentialsUpdated));
        assert_eq!(
            conn.next_event().await,
            Some(BackendEvent::StateChanged(ConnectionState::Closed(
                CloseReason::LoggedOut
            )))
        );
        assert_eq!(conn.next_event().await, None);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_connect_command_reaches_bridge() {
        let dir = tempfile::tempdir().unwrap();
        // Echo the connect line back as a qr token so it can be inspected.
        let backend = sh(r#"read connect
printf '{"event":"qr","qr":"%s"}\n' "$(printf '%s' "$connect" | sed 's/"/_/g')"
"#);
        let mut conn = backend.connect(request(dir.path())).await.unwrap();
        let Some(BackendEvent::ChallengeIssued(echo)) = conn.next_event().await else {
            panic!("expected echoed connect line");
        };
        assert!(echo.contains("_op_:_connect_"));
        assert!(echo.contains("Mac OS"));
        assert!(echo.contains(&dir.path().to_string_lossy().to_string()));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_send_file_acknowledged_and_buffers_events() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sh(r#"read connect
echo '{"event":"connection","state":"open"}'
read send
echo '{"event":"creds.update"}'
echo '{"event":"sent","id":1}'
cat > /dev/null
"#);
        let mut conn = backend.connect(request(dir.path())).await.unwrap();
        assert_eq!(
            conn.next_event().await,
            Some(BackendEvent::StateChanged(ConnectionState::Open))
        );

        let file = OutgoingFile {
            data: b"{}".to_vec(),
            file_name: "creds.json".to_string(),
            mime_type: "application/json".to_string(),
            caption: "c".to_string(),
        };
        conn.send_file("123", &file).await.unwrap();

        // The creds.update that arrived mid-send is not lost.
        assert_eq!(conn.next_event().await, Some(BackendEvent::CredentialsUpdated));
        conn.close().await;
        conn.close().await;
    }

    #[tokio::test]
    async fn test_send_file_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sh(r#"read connect
read send
echo '{"event":"error","id":1,"message":"not logged in"}'
cat > /dev/null
"#);
        let mut conn = backend.connect(request(dir.path())).await.unwrap();
        let file = OutgoingFile {
            data: Vec::new(),
            file_name: "creds.json".to_string(),
            mime_type: "application/json".to_string(),
            caption: String::new(),
        };
        let err = conn.send_file("123", &file).await.unwrap_err();
        assert!(err.to_string().contains("not logged in"));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_bridge_stderr_reported_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sh(r#"read connect
echo 'loading bridge' >&2
echo "Error [ERR_MODULE_NOT_FOUND]: Cannot find module 'bridge/index.mjs'" >&2
echo '    at resolve (node:internal)' >&2
exit 1
"#);
        let mut conn = backend.connect(request(dir.path())).await.unwrap();
        let Some(BackendEvent::Failed(msg)) = conn.next_event().await else {
            panic!("expected the bridge's error line");
        };
        assert!(msg.contains("Cannot find module"), "{msg}");
        assert_eq!(conn.next_event().await, None);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_close_does_not_block_on_unread_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sh("read connect\nexec sleep 1000\n");
        let mut conn = backend.connect(request(dir.path())).await.unwrap();

        // Large enough to fill the pipe; the bridge never reads it.
        let file = OutgoingFile {
            data: vec![b'x'; 512 * 1024],
            file_name: "creds.json".to_string(),
            mime_type: "application/json".to_string(),
            caption: String::new(),
        };
        let sent =
            tokio::time::timeout(Duration::from_millis(500), conn.send_file("123", &file)).await;
        assert!(sent.is_err());

        let closed = tokio::time::timeout(Duration::from_secs(8), conn.close()).await;
        assert!(closed.is_ok());
    }
}
