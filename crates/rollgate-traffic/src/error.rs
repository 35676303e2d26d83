//! Error types for traffic-split management.

use thiserror::Error;

/// Result type alias for traffic operations.
pub type TrafficResult<T> = Result<T, TrafficError>;

/// Errors raised by a traffic manager.
#[derive(Debug, Error)]
pub enum TrafficError {
    /// The requested split could not be applied. Retryable; the rollout
    /// machine retries with backoff before aborting.
    #[error("traffic apply failed for {rollout_id}: {reason}")]
    ApplyFailed { rollout_id: String, reason: String },
}

impl TrafficError {
    pub fn apply_failed(rollout_id: impl Into<String>, reason: impl Into<String>) -> Self {
        TrafficError::ApplyFailed {
            rollout_id: rollout_id.into(),
            reason: reason.into(),
        }
    }
}
