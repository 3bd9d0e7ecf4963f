//! Values exchanged between the pairing controller and a backend.

use crate::error::PairError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File name the backend writes its durable credentials to.
pub const CREDENTIALS_FILE: &str = "creds.json";

/// MIME type of the credentials file.
pub const CREDENTIALS_MIME: &str = "application/json";

/// Lifecycle event emitted by a backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Key material in session storage changed.
    CredentialsUpdated,
    /// A new pairing challenge (QR payload) was issued.
    ChallengeIssued(String),
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// The backend gave up before linking (bad install, handshake error, ...).
    Failed(String),
}

/// Connection state reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed(CloseReason),
}

/// Why the backend closed its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The device was explicitly unlinked. Terminal.
    LoggedOut,
    /// Anything else: restarts, stream errors, network blips.
    Other(String),
}

impl CloseReason {
    /// Map a backend-reported reason string to a [`CloseReason`].
    ///
    /// Accepts the spellings WhatsApp bridges use for an explicit logout,
    /// including the numeric `401` status.
    pub fn from_wire(reason: &str) -> Self {
        let normalized = reason.trim().to_lowercase();
        match normalized.as_str() {
            "loggedout" | "logged_out" | "logged out" | "logout" | "401" => Self::LoggedOut,
            _ => Self::Other(reason.trim().to_string()),
        }
    }

    pub fn is_logout(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::Other(r) if r.is_empty() => f.write_str("unspecified"),
            Self::Other(r) => f.write_str(r),
        }
    }
}

/// One issued pairing challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Opaque token to encode as a QR code.
    pub token: String,
    /// 1-based issuance number within the session.
    pub sequence: u64,
    pub issued_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(token: impl Into<String>, sequence: u64) -> Self {
        Self {
            token: token.into(),
            sequence,
            issued_at: Utc::now(),
        }
    }

    /// Whether this is the first challenge of the session.
    pub fn is_first(&self) -> bool {
        self.sequence == 1
    }

    /// Wall-clock time since issuance. Zero if the clock went backwards.
    pub fn age(&self) -> std::time::Duration {
        (Utc::now() - self.issued_at).to_std().unwrap_or_default()
    }
}

/// Browser identity the backend announces to WhatsApp, as
/// `[platform, browser, version]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[String; 3]", into = "[String; 3]")]
pub struct IdentityProfile {
    pub platform: String,
    pub browser: String,
    pub version: String,
}

impl Default for IdentityProfile {
    fn default() -> Self {
        Self {
            platform: "Mac OS".to_string(),
            browser: "Desktop".to_string(),
            version: "14.4.1".to_string(),
        }
    }
}

impl From<[String; 3]> for IdentityProfile {
    fn from([platform, browser, version]: [String; 3]) -> Self {
        Self {
            platform,
            browser,
            version,
        }
    }
}

impl From<IdentityProfile> for [String; 3] {
    fn from(p: IdentityProfile) -> Self {
        [p.platform, p.browser, p.version]
    }
}

/// WhatsApp Web protocol version hint, e.g. `[2, 3000, 1015901307]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self([2, 3000, 1_015_901_307])
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Credentials file read back from session storage after the link opened.
#[derive(Debug, Clone)]
pub struct CredentialArtifact {
    /// Raw file contents, sent byte-for-byte.
    pub bytes: Vec<u8>,
    /// The linked account id (`me.id`), if the backend recorded it.
    pub owner: Option<String>,
}

impl CredentialArtifact {
    /// Parse a credentials file. The payload must be a JSON document.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PairError> {
        let doc: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| PairError::Delivery(format!("{CREDENTIALS_FILE} is not valid JSON: {e}")))?;
        let owner = doc["me"]["id"].as_str().map(str::to_string);
        Ok(Self { bytes, owner })
    }

    /// Build the outgoing attachment for this artifact.
    pub fn to_outgoing(&self, caption: &str) -> OutgoingFile {
        OutgoingFile {
            data: self.bytes.clone(),
            file_name: CREDENTIALS_FILE.to_string(),
            mime_type: CREDENTIALS_MIME.to_string(),
            caption: caption.to_string(),
        }
    }
}

/// A document attachment to send to the linked account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub data: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub caption: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_age() {
        let mut c = Challenge::new("tok", 1);
        assert!(c.age() < std::time::Duration::from_secs(5));

        c.issued_at = Utc::now() - chrono::Duration::seconds(30);
        assert!(c.age() >= std::time::Duration::from_secs(30));

        c.issued_at = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(c.age(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_close_reason_logout_spellings() {
        for r in ["loggedOut", "logged_out", "logout", "LOGOUT", "401", " loggedout "] {
            assert!(CloseReason::from_wire(r).is_logout(), "{r} should be logout");
        }
    }

    #[test]
    fn test_close_reason_other_kept_verbatim() {
        let reason = CloseReason::from_wire("restartRequired");
        assert_eq!(reason, CloseReason::Other("restartRequired".to_string()));
        assert!(!reason.is_logout());
        assert_eq!(CloseReason::from_wire("").to_string(), "unspecified");
    }

    #[test]
    fn test_identity_profile_array_form() {
        let p: IdentityProfile =
            serde_json::from_str(r#"["Ubuntu", "Chrome", "22.04.4"]"#).unwrap();
        assert_eq!(p.platform, "Ubuntu");
        assert_eq!(p.browser, "Chrome");
        let back = serde_json::to_string(&p).unwrap();
        assert_eq!(back, r#"["Ubuntu","Chrome","22.04.4"]"#);
    }

    #[test]
    fn test_protocol_version_display() {
        assert_eq!(ProtocolVersion([2, 3000, 7]).to_string(), "2.3000.7");
    }

    #[test]
    fn test_artifact_owner_extracted() {
        let a = CredentialArtifact::from_bytes(br#"{"me":{"id":"123"}}"#.to_vec()).unwrap();
        assert_eq!(a.owner.as_deref(), Some("123"));
        let file = a.to_outgoing("hi");
        assert_eq!(file.file_name, "creds.json");
        assert_eq!(file.mime_type, "application/json");
        assert_eq!(file.data, br#"{"me":{"id":"123"}}"#.to_vec());
    }

    #[test]
    fn test_artifact_without_me() {
        let a = CredentialArtifact::from_bytes(b"{}".to_vec()).unwrap();
        assert!(a.owner.is_none());
    }

    #[test]
    fn test_artifact_rejects_non_json() {
        let err = CredentialArtifact::from_bytes(b"not json".to_vec()).unwrap_err();
        assert!(matches!(err, PairError::Delivery(_)));
    }

    #[test]
    fn test_first_challenge() {
        assert!(Challenge::new("a", 1).is_first());
        assert!(!Challenge::new("b", 2).is_first());
    }
}
