//! Action dispatch: executes the side effect behind each generated action.

pub mod cooldown;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::detect::{Action, ActionKind};

pub use cooldown::CooldownDispatcher;
pub use webhook::WebhookDispatcher;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{kind} endpoint rejected the request with status {status}")]
    Rejected { kind: ActionKind, status: u16 },

    #[error("no endpoint configured for {0} actions")]
    NoEndpoint(ActionKind),

    #[error("action ledger unavailable: {0}")]
    Ledger(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Suppressed, e.g. because the same fingerprint fired recently.
    Skipped,
}

/// Executes one action. Implementations must be safe to call again with the
/// same action.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, action: &Action) -> Result<DispatchOutcome, DispatchError>;
}

/// Dry-run dispatcher: logs what would have been sent.
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl ActionDispatcher for LogDispatcher {
    async fn dispatch(&self, action: &Action) -> Result<DispatchOutcome, DispatchError> {
        info!(
            kind = %action.kind,
            target = %action.target,
            priority = %action.priority,
            fingerprint = %action.fingerprint(),
            "dry run, not dispatching"
        );
        Ok(DispatchOutcome::Skipped)
    }
}
