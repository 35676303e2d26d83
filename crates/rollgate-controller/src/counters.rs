//! Controller counters — running totals for the exposition endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

/// Totals since process start. Shared across workers and the API.
#[derive(Debug, Default)]
pub struct ControllerCounters {
    reconciles: AtomicU64,
    reconciles_skipped: AtomicU64,
    promotions: AtomicU64,
    rollbacks: AtomicU64,
    analysis_runs: AtomicU64,
    samples_ingested: AtomicU64,
}

impl ControllerCounters {
    pub fn record_reconcile(&self) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.reconciles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analysis_run(&self) {
        self.analysis_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_samples(&self, count: u64) {
        self.samples_ingested.fetch_add(count, Ordering::Relaxed);
    }

    pub fn reconciles(&self) -> u64 {
        self.reconciles.load(Ordering::Relaxed)
    }

    pub fn reconciles_skipped(&self) -> u64 {
        self.reconciles_skipped.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn analysis_runs(&self) -> u64 {
        self.analysis_runs.load(Ordering::Relaxed)
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested.load(Ordering::Relaxed)
    }

    /// Render totals in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP rollgate_reconciles_total Reconcile passes completed.\n");
        out.push_str("# TYPE rollgate_reconciles_total counter\n");
        out.push_str(&format!("rollgate_reconciles_total {}\n", self.reconciles()));

        out.push_str(
            "# HELP rollgate_reconciles_skipped_total Reconciles dropped because the rollout was already locked.\n",
        );
        out.push_str("# TYPE rollgate_reconciles_skipped_total counter\n");
        out.push_str(&format!(
            "rollgate_reconciles_skipped_total {}\n",
            self.reconciles_skipped()
        ));

        out.push_str("# HELP rollgate_promotions_total Rollouts that reached Stable.\n");
        out.push_str("# TYPE rollgate_promotions_total counter\n");
        out.push_str(&format!("rollgate_promotions_total {}\n", self.promotions()));

        out.push_str("# HELP rollgate_rollbacks_total Rollouts that reached RolledBack.\n");
        out.push_str("# TYPE rollgate_rollbacks_total counter\n");
        out.push_str(&format!("rollgate_rollbacks_total {}\n", self.rollbacks()));

        out.push_str("# HELP rollgate_analysis_runs_total Analysis runs that reached a final verdict.\n");
        out.push_str("# TYPE rollgate_analysis_runs_total counter\n");
        out.push_str(&format!(
            "rollgate_analysis_runs_total {}\n",
            self.analysis_runs()
        ));

        out.push_str("# HELP rollgate_metric_samples_total Metric samples ingested.\n");
        out.push_str("# TYPE rollgate_metric_samples_total counter\n");
        out.push_str(&format!(
            "rollgate_metric_samples_total {}\n",
            self.samples_ingested()
        ));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = ControllerCounters::default();
        assert_eq!(counters.reconciles(), 0);
        assert_eq!(counters.promotions(), 0);
        assert_eq!(counters.rollbacks(), 0);
    }

    #[test]
    fn recording_increments_totals() {
        let counters = ControllerCounters::default();
        counters.record_reconcile();
        counters.record_reconcile();
        counters.record_promotion();
        counters.record_samples(5);

        assert_eq!(counters.reconciles(), 2);
        assert_eq!(counters.promotions(), 1);
        assert_eq!(counters.samples_ingested(), 5);
    }

    #[test]
    fn prometheus_rendering_includes_every_counter() {
        let counters = ControllerCounters::default();
        counters.record_rollback();
        counters.record_skip();

        let body = counters.render_prometheus();
        assert!(body.contains("rollgate_rollbacks_total 1"));
        assert!(body.contains("rollgate_reconciles_skipped_total 1"));
        assert!(body.contains("rollgate_reconciles_total 0"));
        assert!(body.contains("# TYPE rollgate_promotions_total counter"));
    }
}
