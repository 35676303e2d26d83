//! Error types for the rollout state machine.

use thiserror::Error;

/// Result type alias for rollout machine operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors raised by the rollout machine.
///
/// Traffic and provider failures never appear here: the machine absorbs
/// them into its retry and verdict logic and surfaces them as phase
/// transitions (an abort with a reason), not as errors.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// The spec failed validation. Raised at submission; no rollout
    /// state is created.
    #[error("invalid rollout spec: {0}")]
    InvalidSpec(String),

    /// Reading or writing the revision history failed.
    #[error("revision history: {0}")]
    History(#[from] rollgate_state::StateError),
}
