//! Error type shared by every qrlink crate.

use thiserror::Error;

/// Errors raised while preparing, running, or finishing a pairing session.
#[derive(Debug, Error)]
pub enum PairError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
