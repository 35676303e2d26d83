//! StoreMetricProvider — serves metric queries from ingested samples.
//!
//! Security scanners, gateways and policy engines push samples through the
//! ingestion API; this provider reads them back out of the state store. No
//! external telemetry backend is involved, which keeps analysis runs fully
//! reproducible from the store's contents.

use async_trait::async_trait;
use tracing::debug;

use rollgate_state::StateStore;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::MetricProvider;

/// [`MetricProvider`] backed by the rollgate state store.
#[derive(Clone)]
pub struct StoreMetricProvider {
    store: StateStore,
}

impl StoreMetricProvider {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MetricProvider for StoreMetricProvider {
    async fn query(
        &self,
        revision: &str,
        metric: &str,
        window_secs: u64,
        now: u64,
    ) -> ProviderResult<Option<f64>> {
        let start = now.saturating_sub(window_secs);
        let sample = self
            .store
            .latest_metric_in_window(revision, metric, start, now)
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        debug!(
            %revision,
            %metric,
            start,
            end = now,
            hit = sample.is_some(),
            "metric query"
        );
        Ok(sample.map(|s| s.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollgate_state::MetricSample;

    fn seeded_provider(samples: &[(&str, &str, u64, f64)]) -> StoreMetricProvider {
        let store = StateStore::open_in_memory().unwrap();
        for (revision, metric, at, value) in samples {
            store
                .put_metric_sample(&MetricSample {
                    revision: revision.to_string(),
                    metric: metric.to_string(),
                    at: *at,
                    value: *value,
                })
                .unwrap();
        }
        StoreMetricProvider::new(store)
    }

    #[tokio::test]
    async fn returns_latest_value_in_window() {
        let provider = seeded_provider(&[
            ("v2", "critical_vuln_count", 700, 0.0),
            ("v2", "critical_vuln_count", 900, 2.0),
        ]);

        let value = provider
            .query("v2", "critical_vuln_count", 300, 1000)
            .await
            .unwrap();
        assert_eq!(value, Some(2.0));
    }

    #[tokio::test]
    async fn sample_outside_window_is_missing() {
        let provider = seeded_provider(&[("v2", "error_rate", 100, 0.5)]);

        // Window is [700, 1000]; the sample at 100 is too old.
        let value = provider.query("v2", "error_rate", 300, 1000).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn window_start_saturates_at_zero() {
        let provider = seeded_provider(&[("v2", "error_rate", 5, 0.1)]);

        let value = provider.query("v2", "error_rate", 300, 10).await.unwrap();
        assert_eq!(value, Some(0.1));
    }

    #[tokio::test]
    async fn other_revisions_do_not_leak() {
        let provider = seeded_provider(&[("v1", "policy_violations", 900, 4.0)]);

        let value = provider
            .query("v2", "policy_violations", 300, 1000)
            .await
            .unwrap();
        assert_eq!(value, None);
    }
}
