//! Error types for metric providers.

use thiserror::Error;

/// Result type alias for provider queries.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by a metric provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not answer at all (backend down, storage
    /// failure). Callers treat this as a missing sample, never as a
    /// check failure.
    #[error("metric provider unavailable: {0}")]
    Unavailable(String),
}
