//! Protocol-version hint resolution.

use qrlink_core::config::BackendConfig;
use qrlink_core::error::PairError;
use qrlink_core::event::ProtocolVersion;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct VersionDoc {
    version: ProtocolVersion,
}

/// Resolve the version hint to announce to WhatsApp.
///
/// Uses `version_url` when configured and falls back to the configured
/// `version` on any failure.
pub async fn resolve_version(cfg: &BackendConfig) -> ProtocolVersion {
    if cfg.version_url.is_empty() {
        return cfg.version;
    }
    match fetch_latest(&cfg.version_url, cfg.version_timeout()).await {
        Ok(v) => {
            info!("protocol version {v} (from {})", cfg.version_url);
            v
        }
        Err(e) => {
            warn!("version lookup failed, using {}: {e}", cfg.version);
            cfg.version
        }
    }
}

/// Fetch `{"version": [a, b, c]}` from `url`.
pub async fn fetch_latest(url: &str, timeout: Duration) -> Result<ProtocolVersion, PairError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PairError::Backend(format!("http client: {e}")))?;
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| PairError::Backend(format!("version request failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(PairError::Backend(format!(
            "version request returned HTTP {}",
            resp.status()
        )));
    }
    let doc: VersionDoc = resp
        .json()
        .await
        .map_err(|e| PairError::Backend(format!("invalid version document: {e}")))?;
    Ok(doc.version)
}
