//! The seam between the pairing controller and whatever library actually
//! speaks the WhatsApp Web protocol.

use crate::error::PairError;
use crate::event::{BackendEvent, IdentityProfile, OutgoingFile, ProtocolVersion};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Everything a backend needs to open one pairing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Session storage directory owned by this invocation.
    pub storage: PathBuf,
    pub identity: IdentityProfile,
    pub version: ProtocolVersion,
    /// Handshake timeout the backend should apply to its own socket.
    pub connect_timeout: Duration,
}

/// Factory for pairing connections.
#[async_trait]
pub trait PairingBackend: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &str;

    /// Open a new connection bound to the given session storage.
    async fn connect(&self, request: ConnectRequest)
        -> Result<Box<dyn PairingConnection>, PairError>;
}

/// A live connection to the remote service.
#[async_trait]
pub trait PairingConnection: Send {
    /// Next lifecycle event. `None` once the backend stream has ended.
    async fn next_event(&mut self) -> Option<BackendEvent>;

    /// Send a document to `to` (the linked account itself).
    async fn send_file(&mut self, to: &str, file: &OutgoingFile) -> Result<(), PairError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self);
}
