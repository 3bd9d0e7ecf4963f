//! TOML configuration. Every field has a default, so a missing file still
//! yields a runnable setup.

use crate::error::PairError;
use crate::event::{IdentityProfile, ProtocolVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Name of the profile served at `/` and `/scan`.
pub const DEFAULT_PROFILE: &str = "default";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

/// HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty means stderr.
    #[serde(default)]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Where per-invocation session directories are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_root")]
    pub root: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: default_session_root(),
        }
    }
}

/// The external bridge process that runs the WhatsApp Web library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_command")]
    pub command: String,
    #[serde(default = "default_backend_args")]
    pub args: Vec<String>,
    /// Protocol version used when `version_url` is empty or unreachable.
    #[serde(default)]
    pub version: ProtocolVersion,
    /// Optional URL returning `{"version": [a, b, c]}`.
    #[serde(default)]
    pub version_url: String,
    #[serde(default = "default_version_timeout_ms")]
    pub version_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: default_backend_command(),
            args: default_backend_args(),
            version: ProtocolVersion::default(),
            version_url: String::new(),
            version_timeout_ms: default_version_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn version_timeout(&self) -> Duration {
        Duration::from_millis(self.version_timeout_ms)
    }
}

/// One pairing variant: identity, timing, and page decoration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub browser: IdentityProfile,
    /// Hard stop for the whole wait, below the host's execution ceiling.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Pause after the link opens so the backend can flush credentials.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Pause after a successful send before the connection is closed.
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_caption")]
    pub caption: String,
    #[serde(default)]
    pub page: PageConfig,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            browser: IdentityProfile::default(),
            deadline_ms: default_deadline_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_ms: default_settle_ms(),
            linger_ms: default_linger_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            caption: default_caption(),
            page: PageConfig::default(),
        }
    }
}

impl ProfileConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Decoration of the QR page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_heading")]
    pub heading: String,
    #[serde(default = "default_instructions")]
    pub instructions: Vec<String>,
    /// CSS colour of the QR frame.
    #[serde(default = "default_accent")]
    pub accent: String,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// `<meta refresh>` interval in seconds; 0 disables it.
    #[serde(default)]
    pub refresh_secs: u32,
    #[serde(default = "default_success_message")]
    pub success_message: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            heading: default_heading(),
            instructions: default_instructions(),
            accent: default_accent(),
            image_size: default_image_size(),
            refresh_secs: 0,
            success_message: default_success_message(),
        }
    }
}

// --- Defaults ---

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_session_root() -> String {
    "/tmp/qrlink".to_string()
}
fn default_backend_command() -> String {
    "node".to_string()
}
fn default_backend_args() -> Vec<String> {
    vec!["bridge/index.mjs".to_string()]
}
fn default_version_timeout_ms() -> u64 {
    3000
}
fn default_deadline_ms() -> u64 {
    9500
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_settle_ms() -> u64 {
    1000
}
fn default_linger_ms() -> u64 {
    1000
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_caption() -> String {
    "SESSION FILE GENERATED\n\nDownload this file and upload it to your bot deployment."
        .to_string()
}
fn default_title() -> String {
    "WhatsApp Pairing".to_string()
}
fn default_heading() -> String {
    "Scan this QR Code Fast!".to_string()
}
fn default_instructions() -> Vec<String> {
    vec![
        "1. Open WhatsApp > Linked Devices".to_string(),
        "2. Scan this code within 8 seconds".to_string(),
    ]
}
fn default_accent() -> String {
    "#25D366".to_string()
}
fn default_image_size() -> u32 {
    300
}
fn default_success_message() -> String {
    "SUCCESS! The creds.json file has been sent to your WhatsApp Saved Messages.".to_string()
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, PairError> {
        let cfg: Config =
            toml::from_str(text).map_err(|e| PairError::Config(format!("invalid TOML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self, PairError> {
        let path = crate::shellexpand(path);
        if !Path::new(&path).exists() {
            info!("config file {path} not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| PairError::Config(format!("failed to read {path}: {e}")))?;
        Self::from_toml(&text)
    }

    /// Look up a profile. `default` always resolves, configured or not.
    pub fn profile(&self, name: &str) -> Option<ProfileConfig> {
        match self.profiles.get(name) {
            Some(p) => Some(p.clone()),
            None if name == DEFAULT_PROFILE => Some(ProfileConfig::default()),
            None => None,
        }
    }

    /// Names of all servable profiles, `default` included.
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        if !self.profiles.contains_key(DEFAULT_PROFILE) {
            names.insert(0, DEFAULT_PROFILE.to_string());
        }
        names
    }

    fn validate(&self) -> Result<(), PairError> {
        if self.backend.command.trim().is_empty() {
            return Err(PairError::Config("backend.command must not be empty".into()));
        }
        for (name, p) in &self.profiles {
            if p.deadline_ms == 0 {
                return Err(PairError::Config(format!(
                    "profiles.{name}.deadline_ms must be positive"
                )));
            }
            if p.page.image_size == 0 {
                return Err(PairError::Config(format!(
                    "profiles.{name}.page.image_size must be positive"
                )));
            }
        }
        Ok(())
    }
}
