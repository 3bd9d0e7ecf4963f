//! In-memory backend that replays a fixed script and records what the
//! controller did with it.

use async_trait::async_trait;
use qrlink_core::error::PairError;
use qrlink_core::event::{BackendEvent, OutgoingFile, CREDENTIALS_FILE};
use qrlink_core::traits::{ConnectRequest, PairingBackend, PairingConnection};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted step.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver an event.
    Emit(BackendEvent),
    /// Pause before the next step.
    Wait(Duration),
    /// Write the credentials file into the connection's session storage.
    WriteCredentials(Vec<u8>),
    /// End the event stream.
    End,
}

/// Shared record of every interaction with the backend.
#[derive(Debug, Default)]
struct Journal {
    connects: Vec<ConnectRequest>,
    sends: Vec<(String, OutgoingFile)>,
    closes: usize,
}

/// Replays `steps` on every connection. Once the script runs out the
/// connection stays silent, like an idle socket.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    steps: Vec<Step>,
    connect_error: Option<String>,
    send_error: Option<String>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Make every `connect` fail with `message`.
    pub fn failing_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    /// Make every `send_file` fail with `message`.
    pub fn failing_send(mut self, message: &str) -> Self {
        self.send_error = Some(message.to_string());
        self
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.journal().connects.clone()
    }

    pub fn sends(&self) -> Vec<(String, OutgoingFile)> {
        self.journal().sends.clone()
    }

    pub fn close_count(&self) -> usize {
        self.journal().closes
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PairingBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn PairingConnection>, PairError> {
        self.journal().connects.push(request.clone());
        if let Some(msg) = &self.connect_error {
            return Err(PairError::Backend(msg.clone()));
        }
        Ok(Box::new(ScriptedConnection {
            steps: self.steps.iter().cloned().collect(),
            storage: request.storage,
            send_error: self.send_error.clone(),
            journal: self.journal.clone(),
        }))
    }
}

struct ScriptedConnection {
    steps: VecDeque<Step>,
    storage: PathBuf,
    send_error: Option<String>,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl PairingConnection for ScriptedConnection {
    async fn next_event(&mut self) -> Option<BackendEvent> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Emit(ev) => return Some(ev),
                Step::Wait(d) => tokio::time::sleep(d).await,
                Step::WriteCredentials(bytes) => {
                    if let Err(e) =
                        tokio::fs::write(self.storage.join(CREDENTIALS_FILE), bytes).await
                    {
                        tracing::warn!("scripted: failed to write credentials: {e}");
                    }
                }
                Step::End => return None,
            }
        }
        std::future::pending().await
    }

    async fn send_file(&mut self, to: &str, file: &OutgoingFile) -> Result<(), PairError> {
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal.sends.push((to.to_string(), file.clone()));
        match &self.send_error {
            Some(msg) => Err(PairError::Delivery(msg.clone())),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closes += 1;
    }
}
