//! qrlink: one-shot WhatsApp Web pairing: show a QR page, wait for the
//! link, send the generated `creds.json` back to the linked account.

mod api;
mod controller;
mod machine;
mod page;
mod pair;
mod render;
mod selfcheck;
mod storage;

use clap::{Parser, Subcommand};
use qrlink_bridge::{resolve_version, ProcessBackend};
use qrlink_core::config::{Config, LoggingConfig, DEFAULT_PROFILE};
use qrlink_core::shellexpand;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "qrlink",
    version,
    about = "Serve a WhatsApp pairing QR page and deliver the session file"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "QRLINK_CONFIG", default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,
    /// Run one pairing session in the terminal.
    Pair {
        /// Profile to use.
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,
    },
    /// Verify storage, bridge command, and version source.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve => {
            let version = resolve_version(&config.backend).await;
            let backend = Arc::new(ProcessBackend::from_config(&config.backend));
            info!(
                "bridge: {} {} | profiles: {} | protocol {version}",
                config.backend.command,
                config.backend.args.join(" "),
                config.profile_names().join(", ")
            );
            api::serve(api::ApiState::new(backend, config, version)).await?;
        }
        Commands::Pair { profile } => {
            pair::pair_whatsapp(&config, &profile).await?;
        }
        Commands::Check => {
            if !selfcheck::run(&config).await {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Returns the appender guard when logging to a file; keep it alive.
fn init_logging(cfg: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    if cfg.file.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let path = shellexpand(&cfg.file);
    let path = Path::new(&path);
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("logging.file has no file name: {}", cfg.file))?;
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}
