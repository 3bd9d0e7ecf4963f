//! Startup self-check. Verifies the pieces a pairing session needs.

use qrlink_bridge::version::fetch_latest;
use qrlink_core::config::Config;
use qrlink_core::shellexpand;
use std::path::{Path, PathBuf};

/// Result of a single check.
struct CheckResult {
    name: String,
    detail: String,
    ok: bool,
}

/// Run all checks. Returns true if all passed.
pub async fn run(config: &Config) -> bool {
    let mut results = Vec::new();

    // 1. Profiles.
    results.push(CheckResult {
        name: "Profiles".to_string(),
        detail: config.profile_names().join(", "),
        ok: true,
    });

    // 2. Session storage root.
    results.push(check_storage(&PathBuf::from(shellexpand(&config.session.root))).await);

    // 3. Bridge command.
    results.push(check_bridge(&config.backend.command));

    // 4. Version source.
    if !config.backend.version_url.is_empty() {
        results.push(check_version(config).await);
    }

    println!("\nqrlink Self-Check");
    println!("=================");
    let mut all_ok = true;
    for r in &results {
        let icon = if r.ok { "+" } else { "x" };
        println!("  {icon} {} — {}", r.name, r.detail);
        if !r.ok {
            all_ok = false;
        }
    }
    println!();

    all_ok
}

async fn check_storage(root: &Path) -> CheckResult {
    let probe = root.join(".qrlink-probe");
    let result = async {
        tokio::fs::create_dir_all(&probe).await?;
        tokio::fs::write(probe.join("probe"), b"ok").await?;
        tokio::fs::remove_dir_all(&probe).await
    }
    .await;

    match result {
        Ok(()) => CheckResult {
            name: "Storage".to_string(),
            detail: format!("{} (writable)", root.display()),
            ok: true,
        },
        Err(e) => CheckResult {
            name: "Storage".to_string(),
            detail: format!("{} (FAILED: {e})", root.display()),
            ok: false,
        },
    }
}

fn check_bridge(command: &str) -> CheckResult {
    match find_on_path(command) {
        Some(path) => CheckResult {
            name: "Bridge".to_string(),
            detail: format!("{command} ({})", path.display()),
            ok: true,
        },
        None => CheckResult {
            name: "Bridge".to_string(),
            detail: format!("{command} (NOT FOUND on $PATH)"),
            ok: false,
        },
    }
}

async fn check_version(config: &Config) -> CheckResult {
    let url = &config.backend.version_url;
    match fetch_latest(url, config.backend.version_timeout()).await {
        Ok(v) => CheckResult {
            name: "Version".to_string(),
            detail: format!("{v} (from {url})"),
            ok: true,
        },
        // Non-fatal at runtime, the configured version is used instead.
        Err(e) => CheckResult {
            name: "Version".to_string(),
            detail: format!("{url} unreachable, will use {}: {e}", config.backend.version),
            ok: true,
        },
    }
}

/// Resolve `command` the way a spawn would: paths as-is, bare names via `$PATH`.
fn find_on_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_storage_check_writable() {
        let root = tempfile::tempdir().unwrap();
        let r = check_storage(root.path()).await;
        assert!(r.ok);
        assert!(!root.path().join(".qrlink-probe").exists());
    }

    #[tokio::test]
    async fn test_storage_check_blocked() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let r = check_storage(&file).await;
        assert!(!r.ok);
        assert!(r.detail.contains("FAILED"));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_on_path() {
        assert!(find_on_path("sh").is_some());
        assert!(find_on_path("/bin/sh").is_some());
        assert!(find_on_path("definitely-not-a-real-binary-qrlink").is_none());
        assert!(!check_bridge("definitely-not-a-real-binary-qrlink").ok);
    }
}
