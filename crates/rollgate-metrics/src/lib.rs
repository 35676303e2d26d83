//! rollgate-metrics — metric providers backing analysis checks.
//!
//! A [`MetricProvider`] answers point-in-time queries for a revision's
//! signal values (error rates, latency percentiles, vulnerability counts).
//! Providers are deliberately thin: the analysis engine owns all verdict
//! logic and treats an unavailable provider the same as a missing sample,
//! so flaky telemetry degrades a run to inconclusive instead of failing it.

pub mod error;
pub mod provider;
pub mod store;

pub use error::{ProviderError, ProviderResult};
pub use provider::MetricProvider;
pub use store::StoreMetricProvider;
