//! Terminal pairing via QR code: the same session, shown in the console.

use crate::controller::{PairingController, Presenter};
use crate::machine::Outcome;
use crate::render::generate_qr_terminal;
use async_trait::async_trait;
use qrlink_bridge::{resolve_version, ProcessBackend};
use qrlink_core::config::Config;
use qrlink_core::error::PairError;
use qrlink_core::event::Challenge;
use qrlink_core::shellexpand;
use std::path::PathBuf;
use std::sync::Arc;

/// Shows challenges with cliclack and a spinner while waiting.
struct TerminalPresenter {
    spinner: Option<cliclack::ProgressBar>,
}

#[async_trait]
impl Presenter for TerminalPresenter {
    async fn challenge(&mut self, challenge: &Challenge) -> Result<(), PairError> {
        let qr = generate_qr_terminal(&challenge.token)?;
        if let Some(spinner) = self.spinner.take() {
            spinner.stop("New code issued");
        }
        let title = if challenge.is_first() {
            "Scan this QR code with WhatsApp".to_string()
        } else {
            format!("Code refreshed (#{}), scan this one", challenge.sequence)
        };
        cliclack::note(title, qr)?;

        let spinner = cliclack::spinner();
        spinner.start("Waiting for scan...");
        self.spinner = Some(spinner);
        Ok(())
    }

    async fn conclude(&mut self, outcome: &Outcome) {
        let spinner = self.spinner.take();
        match outcome {
            Outcome::Linked { recipient } => {
                let msg = format!("Linked! creds.json sent to {recipient}");
                match spinner {
                    Some(s) => s.stop(msg),
                    None => {
                        let _ = cliclack::log::success(msg);
                    }
                }
            }
            Outcome::TimedOut => {
                let msg = "Pairing timed out.";
                match spinner {
                    Some(s) => s.error(msg),
                    None => {
                        let _ = cliclack::log::error(msg);
                    }
                }
            }
            Outcome::Failed(failure) => {
                let msg = format!("Pairing failed: {failure}");
                match spinner {
                    Some(s) => s.error(msg),
                    None => {
                        let _ = cliclack::log::error(msg);
                    }
                }
            }
        }
    }
}

/// Run one interactive pairing session with the named profile.
pub async fn pair_whatsapp(config: &Config, profile_name: &str) -> anyhow::Result<()> {
    cliclack::intro(console::style("qrlink pair").bold().to_string())?;

    let profile = config
        .profile(profile_name)
        .ok_or_else(|| anyhow::anyhow!("unknown profile '{profile_name}'"))?;

    cliclack::log::info("Open WhatsApp on your phone → Linked Devices → Link a Device")?;
    cliclack::log::step(format!(
        "Profile '{profile_name}', {}s to scan",
        profile.deadline().as_secs_f32()
    ))?;

    let version = resolve_version(&config.backend).await;
    let controller = PairingController::new(
        Arc::new(ProcessBackend::from_config(&config.backend)),
        PathBuf::from(shellexpand(&config.session.root)),
        profile,
        version,
    );

    let mut presenter = TerminalPresenter { spinner: None };
    match controller.run(&mut presenter).await {
        Outcome::Linked { .. } => {
            cliclack::outro("Check your WhatsApp saved messages for creds.json.")?;
            Ok(())
        }
        Outcome::TimedOut => {
            cliclack::outro("Try again with: qrlink pair")?;
            Ok(())
        }
        Outcome::Failed(failure) => {
            cliclack::outro_cancel("Pairing did not complete.")?;
            Err(anyhow::anyhow!("{failure}"))
        }
    }
}
