//! Controller error types.

use thiserror::Error;

use rollgate_rollout::RolloutError;

/// Errors surfaced by controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Rollout document rejected at submission; nothing was persisted.
    #[error("invalid rollout spec: {0}")]
    InvalidSpec(String),

    #[error("rollout not found: {0}")]
    NotFound(String),

    /// A rollout with this identity has not reached a terminal phase.
    #[error("rollout already active: {0}")]
    AlreadyActive(String),

    /// Another worker holds this rollout's reconcile lock.
    #[error("reconcile already in progress for {0}")]
    ReconcileInProgress(String),

    #[error("state store error: {0}")]
    State(#[from] rollgate_state::StateError),
}

impl From<RolloutError> for ControllerError {
    fn from(err: RolloutError) -> Self {
        match err {
            RolloutError::InvalidSpec(msg) => ControllerError::InvalidSpec(msg),
            RolloutError::History(e) => ControllerError::State(e),
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
