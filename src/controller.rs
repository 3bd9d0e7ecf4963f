//! Pairing-session controller: drives one linking attempt end to end.
//!
//! Prepares storage, opens the backend connection, races backend events
//! against the deadline, delivers the credentials once linked, and hands
//! exactly one outcome to the [`Presenter`].

use crate::machine::{Action, Failure, Input, Outcome, SessionMachine};
use crate::storage::SessionStorage;
use async_trait::async_trait;
use qrlink_core::config::ProfileConfig;
use qrlink_core::error::PairError;
use qrlink_core::event::{Challenge, CredentialArtifact, ProtocolVersion};
use qrlink_core::traits::{ConnectRequest, PairingBackend, PairingConnection};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};


/// Where a session's challenges and outcome are shown.
#[async_trait]
pub trait Presenter: Send {
    /// Show a challenge, replacing any shown before it.
    async fn challenge(&mut self, challenge: &Challenge) -> Result<(), PairError>;

    /// Report the outcome. Called exactly once per session.
    async fn conclude(&mut self, outcome: &Outcome);
}

/// Runs pairing sessions for one profile.
pub struct PairingController {
    backend: Arc<dyn PairingBackend>,
    storage_root: PathBuf,
    profile: ProfileConfig,
    version: ProtocolVersion,
}

/// Live resources of one session, released in [`PairingController::release`].
#[derive(Default)]
struct Session {
    storage: Option<SessionStorage>,
    conn: Option<Box<dyn PairingConnection>>,
}

impl PairingController {
    pub fn new(
        backend: Arc<dyn PairingBackend>,
        storage_root: PathBuf,
        profile: ProfileConfig,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            backend,
            storage_root,
            profile,
            version,
        }
    }

    /// Run one session to completion and return its outcome.
    pub async fn run(&self, presenter: &mut dyn Presenter) -> Outcome {
        let mut machine = SessionMachine::new();
        let mut session = Session::default();
        let mut shown: Option<Challenge> = None;

        let deadline = tokio::time::sleep(self.profile.deadline());
        tokio::pin!(deadline);

        let mut next = tokio::select! {
            opened = self.open(&mut session) => match opened {
                Ok(()) => Input::Ready,
                Err(e) => Input::Error(Failure::Setup(e.to_string())),
            },
            _ = &mut deadline => Input::Deadline,
        };

        let outcome = loop {
            let mut deliver = false;
            let mut concluded = None;
            for action in machine.handle(next) {
                match action {
                    Action::Present(challenge) => {
                        if let Some(prev) = &shown {
                            debug!(
                                "challenge #{} replaced after {:?}",
                                prev.sequence,
                                prev.age()
                            );
                        }
                        if let Err(e) = presenter.challenge(&challenge).await {
                            error!("failed to present challenge #{}: {e}", challenge.sequence);
                            concluded = machine
                                .handle(Input::Error(Failure::Setup(e.to_string())))
                                .into_iter()
                                .find_map(|a| match a {
                                    Action::Conclude(o) => Some(o),
                                    _ => None,
                                });
                        } else {
                            shown = Some(challenge);
                        }
                    }
                    Action::Deliver => deliver = true,
                    Action::Conclude(o) => concluded = Some(o),
                }
            }
            if let Some(outcome) = concluded {
                break outcome;
            }

            next = if deliver {
                self.deliver(&mut session).await
            } else {
                self.wait(&mut session, deadline.as_mut()).await
            };
        };

        match &outcome {
            Outcome::Linked { recipient } => {
                match &shown {
                    Some(c) => info!(
                        "credentials delivered to {recipient}, {:?} after challenge #{} was shown",
                        c.age(),
                        c.sequence
                    ),
                    None => info!("credentials delivered to {recipient}"),
                }
                presenter.conclude(&outcome).await;
                tokio::time::sleep(self.profile.linger()).await;
                self.release(&mut session).await;
            }
            Outcome::TimedOut => {
                info!(
                    "pairing timed out after {:?} ({} challenge(s) shown)",
                    self.profile.deadline(),
                    machine.challenges_issued()
                );
                self.release(&mut session).await;
                presenter.conclude(&outcome).await;
            }
            Outcome::Failed(failure) => {
                warn!("pairing failed: {failure}");
                self.release(&mut session).await;
                presenter.conclude(&outcome).await;
            }
        }

        outcome
    }

    /// Prepare storage and open the backend connection.
    async fn open(&self, session: &mut Session) -> Result<(), PairError> {
        let storage = SessionStorage::prepare(&self.storage_root).await?;
        let request = ConnectRequest {
            storage: storage.dir().to_path_buf(),
            identity: self.profile.browser.clone(),
            version: self.version,
            connect_timeout: self.profile.connect_timeout(),
        };
        session.storage = Some(storage);

        info!(
            "opening {} connection as {} / {} (v{})",
            self.backend.name(),
            request.identity.platform,
            request.identity.browser,
            request.version
        );
        session.conn = Some(self.backend.connect(request).await?);
        Ok(())
    }

    /// Wait for the next backend event or the deadline, whichever is first.
    async fn wait(
        &self,
        session: &mut Session,
        deadline: std::pin::Pin<&mut tokio::time::Sleep>,
    ) -> Input {
        let Some(conn) = session.conn.as_mut() else {
            return Input::Error(Failure::Setup("no backend connection".into()));
        };
        tokio::select! {
            ev = conn.next_event() => match ev {
                Some(ev) => Input::Backend(ev),
                None => Input::Error(Failure::Setup("backend event stream ended".into())),
            },
            _ = deadline => Input::Deadline,
        }
    }

    /// Settle, then send the credentials, bounded by the send timeout.
    async fn deliver(&self, session: &mut Session) -> Input {
        tokio::time::sleep(self.profile.settle()).await;
        match tokio::time::timeout(self.profile.send_timeout(), self.send_credentials(session))
            .await
        {
            Ok(Ok(recipient)) => Input::Delivered { recipient },
            Ok(Err(e)) => Input::Error(Failure::Delivery(e.to_string())),
            Err(_) => Input::Error(Failure::Delivery(format!(
                "send not confirmed within {:?}",
                self.profile.send_timeout()
            ))),
        }
    }

    async fn send_credentials(&self, session: &mut Session) -> Result<String, PairError> {
        let (Some(storage), Some(conn)) = (session.storage.as_ref(), session.conn.as_mut())
        else {
            return Err(PairError::Delivery("session not open".into()));
        };

        let bytes = storage.read_credentials().await?.ok_or_else(|| {
            PairError::Delivery(format!(
                "{} missing after link",
                storage.credentials_path().display()
            ))
        })?;
        let artifact = CredentialArtifact::from_bytes(bytes)?;
        let recipient = artifact
            .owner
            .clone()
            .ok_or_else(|| PairError::Delivery("credentials carry no me.id".into()))?;

        debug!("sending {} bytes of credentials", artifact.bytes.len());
        conn.send_file(&recipient, &artifact.to_outgoing(&self.profile.caption))
            .await?;
        Ok(recipient)
    }

    /// Close the connection and remove storage. Never fails.
    async fn release(&self, session: &mut Session) {
        if let Some(mut conn) = session.conn.take() {
            conn.close().await;
        }
        if let Some(mut storage) = session.storage.take() {
            if let Err(e) = storage.remove().await {
                warn!("session cleanup: {e}");
            }
        }
    }
}
