//! # qrlink-bridge
//!
//! Pairing backends for qrlink.
//!
//! - [`process::ProcessBackend`] drives an external bridge process that hosts
//!   the WhatsApp Web library, speaking newline-delimited JSON over stdio.
//! - [`scripted::ScriptedBackend`] replays a fixed event script in memory.

pub mod process;
pub mod protocol;
pub mod scripted;
pub mod version;

pub use process::ProcessBackend;
pub use scripted::{ScriptedBackend, Step};
pub use version::resolve_version;
