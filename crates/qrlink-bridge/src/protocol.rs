//! Wire format between qrlink and the bridge process.
//!
//! One JSON object per line in each direction. Commands carry an `op` tag,
//! events carry an `event` tag. Unknown fields are ignored.

use qrlink_core::event::{BackendEvent, CloseReason, ConnectionState};
use serde::{Deserialize, Serialize};

/// Command written to the bridge's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeCommand<'a> {
    Connect {
        storage: &'a str,
        browser: [&'a str; 3],
        version: [u32; 3],
        connect_timeout_ms: u64,
    },
    SendFile {
        id: u64,
        to: &'a str,
        file_name: &'a str,
        mimetype: &'a str,
        caption: &'a str,
        /// Base64-encoded file contents.
        data: String,
    },
    Close,
}

/// Event read from the bridge's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum BridgeEvent {
    #[serde(rename = "creds.update")]
    CredsUpdate,
    #[serde(rename = "qr")]
    Qr { qr: String },
    #[serde(rename = "connection")]
    Connection {
        state: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "sent")]
    Sent { id: u64 },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        id: Option<u64>,
        message: String,
    },
}

impl BridgeEvent {
    /// Parse one stdout line. Blank and non-JSON lines yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// Convert to a lifecycle event, if this is one.
    ///
    /// Send acknowledgements and request-scoped errors are not lifecycle
    /// events. Transitional states such as `connecting` are dropped.
    pub fn into_lifecycle(self) -> Option<BackendEvent> {
        match self {
            Self::CredsUpdate => Some(BackendEvent::CredentialsUpdated),
            Self::Qr { qr } => Some(BackendEvent::ChallengeIssued(qr)),
            Self::Connection { state, reason } => match state.as_str() {
                "open" => Some(BackendEvent::StateChanged(ConnectionState::Open)),
                "close" | "closed" => Some(BackendEvent::StateChanged(ConnectionState::Closed(
                    CloseReason::from_wire(reason.as_deref().unwrap_or_default()),
                ))),
                _ => None,
            },
            Self::Error { id: None, message } => Some(BackendEvent::Failed(message)),
            Self::Error { id: Some(_), .. } | Self::Sent { .. } => None,
        }
    }
}
