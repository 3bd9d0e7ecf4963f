//! Pairing-session lifecycle state machine.
//!
//! Pure transitions: `(phase, input) -> (phase', actions)`. The async driver
//! in [`crate::controller`] feeds inputs from the backend, the deadline timer,
//! and its own delivery step, then carries out the returned actions.
//!
//! ```text
//! Initializing ──Ready──▶ AwaitingChallengeOrLink ──open──▶ Delivering ──Delivered──▶ Done
//!      │                    │  ▲ challenge / creds / close(other)        │
//!      │                    └──┘                                         │
//!      ├──Deadline──▶ TimedOut ◀──Deadline── (awaiting)                  │
//!      └──Error─────▶ Failed ◀── close(logout) / Failed / Error ─────────┘
//! ```

use qrlink_core::event::{BackendEvent, Challenge, CloseReason, ConnectionState};
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    AwaitingChallengeOrLink,
    Delivering,
    Done,
    TimedOut,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::TimedOut | Self::Failed)
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Storage or backend could not be brought up, or the backend gave up.
    Setup(String),
    /// Linked, but the credentials could not be read or sent.
    Delivery(String),
    /// The backend reported an explicit logout.
    LoggedOut,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(m) => write!(f, "setup failed: {m}"),
            Self::Delivery(m) => write!(f, "delivery failed: {m}"),
            Self::LoggedOut => f.write_str("the device was logged out before linking finished"),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Credentials were sent to `recipient`.
    Linked { recipient: String },
    TimedOut,
    Failed(Failure),
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Storage prepared and backend connection open.
    Ready,
    Backend(BackendEvent),
    /// The deadline timer fired.
    Deadline,
    /// The credentials file reached the linked account.
    Delivered { recipient: String },
    Error(Failure),
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Show this challenge, replacing any earlier one.
    Present(Challenge),
    /// Settle, read the credentials, and send them.
    Deliver,
    /// Produce the single terminal response.
    Conclude(Outcome),
}

/// State of one pairing session.
#[derive(Debug)]
pub struct SessionMachine {
    phase: Phase,
    issued: u64,
    last_token: Option<String>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Initializing,
            issued: 0,
            last_token: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of distinct challenges presented so far.
    pub fn challenges_issued(&self) -> u64 {
        self.issued
    }

    /// Apply one input. Terminal phases absorb everything, which is what
    /// keeps `Conclude` to exactly one per session.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        if self.phase.is_terminal() {
            debug!("session already {:?}, ignoring {input:?}", self.phase);
            return Vec::new();
        }

        match (self.phase, input) {
            (_, Input::Error(failure)) => self.fail(failure),

            (Phase::Initializing, Input::Ready) => {
                self.phase = Phase::AwaitingChallengeOrLink;
                Vec::new()
            }

            (Phase::Initializing | Phase::AwaitingChallengeOrLink, Input::Deadline) => {
                self.phase = Phase::TimedOut;
                vec![Action::Conclude(Outcome::TimedOut)]
            }

            (Phase::AwaitingChallengeOrLink, Input::Backend(ev)) => self.on_backend(ev),

            (Phase::Delivering, Input::Delivered { recipient }) => {
                self.phase = Phase::Done;
                vec![Action::Conclude(Outcome::Linked { recipient })]
            }

            (phase, input) => {
                debug!("no transition from {phase:?} on {input:?}");
                Vec::new()
            }
        }
    }

    fn on_backend(&mut self, ev: BackendEvent) -> Vec<Action> {
        match ev {
            BackendEvent::CredentialsUpdated => {
                debug!("credentials updated");
                Vec::new()
            }
            BackendEvent::ChallengeIssued(token) => {
                if self.last_token.as_deref() == Some(token.as_str()) {
                    debug!("duplicate challenge, already presented");
                    return Vec::new();
                }
                self.issued += 1;
                self.last_token = Some(token.clone());
                info!("challenge #{} issued", self.issued);
                vec![Action::Present(Challenge::new(token, self.issued))]
            }
            BackendEvent::StateChanged(ConnectionState::Open) => {
                info!("link established");
                self.phase = Phase::Delivering;
                vec![Action::Deliver]
            }
            BackendEvent::StateChanged(ConnectionState::Closed(CloseReason::LoggedOut)) => {
                warn!("backend reported logout");
                self.fail(Failure::LoggedOut)
            }
            BackendEvent::StateChanged(ConnectionState::Closed(reason)) => {
                warn!("connection closed ({reason}), waiting for deadline or a new challenge");
                Vec::new()
            }
            BackendEvent::Failed(msg) => self.fail(Failure::Setup(msg)),
        }
    }

    fn fail(&mut self, failure: Failure) -> Vec<Action> {
        self.phase = Phase::Failed;
        vec![Action::Conclude(Outcome::Failed(failure))]
    }
}
