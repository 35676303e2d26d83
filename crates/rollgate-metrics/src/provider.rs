//! MetricProvider — the seam between analysis checks and telemetry.

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Answers "what is the current value of `metric` for `revision`?".
///
/// A query looks back `window_secs` seconds from `now` and returns the
/// most recent value in that window, or `Ok(None)` when the window holds
/// no data. Timestamps are explicit so callers stay deterministic and
/// replayable.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    async fn query(
        &self,
        revision: &str,
        metric: &str,
        window_secs: u64,
        now: u64,
    ) -> ProviderResult<Option<f64>>;
}
