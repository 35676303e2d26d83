//! AnalysisEngine — instantiates and ticks analysis runs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use rollgate_metrics::MetricProvider;
use rollgate_state::{AnalysisRunState, AnalysisTemplate, CheckProgress, CheckState, Verdict};

use crate::check;

fn default_interval_secs() -> u64 {
    30
}

fn default_window_secs() -> u64 {
    120
}

fn default_missing_limit() -> u32 {
    5
}

/// Engine-wide analysis tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Sample cadence for templates that don't set their own.
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    /// Lookback window for each provider query.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Consecutive missing samples on any one check that drive the whole
    /// run inconclusive.
    #[serde(default = "default_missing_limit")]
    pub missing_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval_secs(),
            window_secs: default_window_secs(),
            missing_limit: default_missing_limit(),
        }
    }
}

/// Evaluates analysis runs against a metric provider.
///
/// The engine holds no per-run state; everything needed to continue a run
/// travels in the [`AnalysisRunState`] it is handed back.
#[derive(Clone)]
pub struct AnalysisEngine {
    provider: Arc<dyn MetricProvider>,
    config: EngineConfig,
}

impl AnalysisEngine {
    pub fn new(provider: Arc<dyn MetricProvider>, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    /// Instantiate a run from a template. The first sample is due
    /// immediately; `sample_budget` bounds how many ticks the run may
    /// stay pending before it is declared inconclusive.
    pub fn begin_run(
        &self,
        template: &AnalysisTemplate,
        attempt: u32,
        sample_budget: u32,
        now: u64,
    ) -> AnalysisRunState {
        let interval_secs = template
            .interval_secs
            .unwrap_or(self.config.default_interval_secs);
        info!(
            template = %template.name,
            attempt,
            sample_budget,
            interval_secs,
            "analysis run started"
        );
        AnalysisRunState {
            template: template.name.clone(),
            attempt,
            started_at: now,
            sample_budget,
            samples_taken: 0,
            interval_secs,
            next_sample_at: now,
            verdict: Verdict::Pending,
            checks: template
                .checks
                .iter()
                .cloned()
                .map(CheckProgress::new)
                .collect(),
        }
    }

    /// Advance a run by at most one sample tick and return its aggregate
    /// verdict. Runs that are already final, or not yet due, are left
    /// untouched, so the call is safe to repeat.
    ///
    /// A provider error is absorbed as a missing sample for the affected
    /// check; it never fails the run directly.
    pub async fn tick(&self, run: &mut AnalysisRunState, revision: &str, now: u64) -> Verdict {
        if run.verdict.is_final() || now < run.next_sample_at {
            return run.verdict;
        }

        let mut missing_overflow = false;
        for check in run
            .checks
            .iter_mut()
            .filter(|c| c.state == CheckState::Pending)
        {
            let value = match self
                .provider
                .query(revision, &check.spec.metric, self.config.window_secs, now)
                .await
            {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        %revision,
                        metric = %check.spec.metric,
                        error = %e,
                        "provider query failed; counting sample as missing"
                    );
                    None
                }
            };
            check::observe(check, now, value);
            if check.consecutive_missing >= self.config.missing_limit {
                missing_overflow = true;
            }
        }

        run.samples_taken += 1;
        run.next_sample_at = now + run.interval_secs;

        let any_failed = run.checks.iter().any(|c| c.state == CheckState::Failed);
        let all_passed = run.checks.iter().all(|c| c.state == CheckState::Passed);

        run.verdict = if any_failed {
            Verdict::Failed
        } else if all_passed {
            Verdict::Successful
        } else if missing_overflow || run.samples_taken >= run.sample_budget {
            Verdict::Inconclusive
        } else {
            Verdict::Pending
        };

        if run.verdict.is_final() {
            info!(
                template = %run.template,
                attempt = run.attempt,
                verdict = %run.verdict,
                samples = run.samples_taken,
                "analysis run finished"
            );
        }
        run.verdict
    }
}

/// The first check that failed a run, if any. Its name and failure
/// reason feed the rollout's abort reason.
pub fn failed_check(run: &AnalysisRunState) -> Option<&CheckProgress> {
    run.checks.iter().find(|c| c.state == CheckState::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rollgate_metrics::{ProviderError, ProviderResult};
    use rollgate_state::{CheckOp, CheckSpec};

    /// Provider that replays a scripted sequence of values per metric;
    /// an exhausted script reads as missing data.
    struct ScriptedProvider {
        scripts: Mutex<HashMap<String, VecDeque<Option<f64>>>>,
    }

    impl ScriptedProvider {
        fn new(scripts: &[(&str, &[Option<f64>])]) -> Arc<Self> {
            let scripts = scripts
                .iter()
                .map(|(metric, values)| (metric.to_string(), values.iter().copied().collect()))
                .collect();
            Arc::new(Self {
                scripts: Mutex::new(scripts),
            })
        }
    }

    #[async_trait]
    impl MetricProvider for ScriptedProvider {
        async fn query(
            &self,
            _revision: &str,
            metric: &str,
            _window_secs: u64,
            _now: u64,
        ) -> ProviderResult<Option<f64>> {
            let mut scripts = self.scripts.lock().unwrap();
            Ok(scripts
                .get_mut(metric)
                .and_then(|script| script.pop_front())
                .flatten())
        }
    }

    /// Provider whose backend is down for every query.
    struct DownProvider;

    #[async_trait]
    impl MetricProvider for DownProvider {
        async fn query(
            &self,
            _revision: &str,
            _metric: &str,
            _window_secs: u64,
            _now: u64,
        ) -> ProviderResult<Option<f64>> {
            Err(ProviderError::Unavailable("connection refused".to_string()))
        }
    }

    fn check_spec(name: &str, metric: &str, hard: bool, min_samples: u32) -> CheckSpec {
        CheckSpec {
            name: name.to_string(),
            metric: metric.to_string(),
            op: CheckOp::Le,
            threshold: 0.0,
            hard,
            min_samples,
            max_consecutive_failures: 3,
        }
    }

    fn template(checks: Vec<CheckSpec>) -> AnalysisTemplate {
        AnalysisTemplate {
            name: "security-baseline".to_string(),
            checks,
            interval_secs: None,
        }
    }

    fn engine(provider: Arc<dyn MetricProvider>) -> AnalysisEngine {
        AnalysisEngine::new(
            provider,
            EngineConfig {
                missing_limit: 3,
                ..EngineConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn run_succeeds_when_all_checks_pass() {
        let provider = ScriptedProvider::new(&[(
            "critical_vuln_count",
            &[Some(0.0), Some(0.0), Some(0.0)],
        )]);
        let engine = engine(provider);
        let tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 3)]);

        let mut run = engine.begin_run(&tmpl, 1, 10, 0);
        assert_eq!(engine.tick(&mut run, "v2", 0).await, Verdict::Pending);
        assert_eq!(engine.tick(&mut run, "v2", 30).await, Verdict::Pending);
        assert_eq!(engine.tick(&mut run, "v2", 60).await, Verdict::Successful);
        assert_eq!(run.samples_taken, 3);
    }

    #[tokio::test]
    async fn hard_failure_short_circuits_on_first_tick() {
        let provider = ScriptedProvider::new(&[("critical_vuln_count", &[Some(1.0)])]);
        let engine = engine(provider);
        let tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 3)]);

        let mut run = engine.begin_run(&tmpl, 1, 10, 0);
        assert_eq!(engine.tick(&mut run, "v2", 0).await, Verdict::Failed);

        let failed = failed_check(&run).unwrap();
        assert_eq!(failed.spec.name, "vulns");
        assert!(failed.failure_reason.as_deref().unwrap().contains("1"));
    }

    #[tokio::test]
    async fn tick_before_deadline_is_a_noop() {
        let provider = ScriptedProvider::new(&[("critical_vuln_count", &[Some(0.0), Some(0.0)])]);
        let engine = engine(provider);
        let tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 2)]);

        let mut run = engine.begin_run(&tmpl, 1, 10, 0);
        engine.tick(&mut run, "v2", 0).await;
        assert_eq!(run.samples_taken, 1);

        // Next sample is due at t=30; an early tick takes nothing.
        engine.tick(&mut run, "v2", 10).await;
        assert_eq!(run.samples_taken, 1);
        assert_eq!(run.verdict, Verdict::Pending);
    }

    #[tokio::test]
    async fn provider_outage_drives_run_inconclusive() {
        let engine = engine(Arc::new(DownProvider));
        let tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 2)]);

        let mut run = engine.begin_run(&tmpl, 1, 10, 0);
        assert_eq!(engine.tick(&mut run, "v2", 0).await, Verdict::Pending);
        assert_eq!(engine.tick(&mut run, "v2", 30).await, Verdict::Pending);
        assert_eq!(engine.tick(&mut run, "v2", 60).await, Verdict::Inconclusive);

        // Every tick was recorded as a missing sample, not a failure.
        assert!(run.checks[0]
            .samples
            .iter()
            .all(|s| s.verdict == rollgate_state::SampleVerdict::Missing));
    }

    #[tokio::test]
    async fn exhausted_budget_is_inconclusive() {
        let provider = ScriptedProvider::new(&[("critical_vuln_count", &[Some(0.0), Some(0.0)])]);
        let engine = engine(provider);
        let tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 10)]);

        let mut run = engine.begin_run(&tmpl, 1, 2, 0);
        assert_eq!(engine.tick(&mut run, "v2", 0).await, Verdict::Pending);
        assert_eq!(engine.tick(&mut run, "v2", 30).await, Verdict::Inconclusive);
    }

    #[tokio::test]
    async fn finished_run_ignores_further_ticks() {
        let provider = ScriptedProvider::new(&[("critical_vuln_count", &[Some(1.0), Some(0.0)])]);
        let engine = engine(provider);
        let tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 1)]);

        let mut run = engine.begin_run(&tmpl, 1, 10, 0);
        engine.tick(&mut run, "v2", 0).await;
        assert_eq!(run.verdict, Verdict::Failed);

        engine.tick(&mut run, "v2", 30).await;
        assert_eq!(run.verdict, Verdict::Failed);
        assert_eq!(run.samples_taken, 1);
    }

    #[tokio::test]
    async fn aggregate_waits_for_every_check() {
        let provider = ScriptedProvider::new(&[
            ("critical_vuln_count", &[Some(0.0), Some(0.0)][..]),
            ("policy_violations", &[Some(0.0), Some(0.0)][..]),
        ]);
        let engine = engine(provider);
        let tmpl = template(vec![
            check_spec("vulns", "critical_vuln_count", true, 1),
            check_spec("policy", "policy_violations", false, 2),
        ]);

        let mut run = engine.begin_run(&tmpl, 1, 10, 0);
        // First check passes on tick one, second still needs a sample.
        assert_eq!(engine.tick(&mut run, "v2", 0).await, Verdict::Pending);
        assert_eq!(engine.tick(&mut run, "v2", 30).await, Verdict::Successful);
    }

    #[tokio::test]
    async fn template_interval_overrides_default() {
        let provider = ScriptedProvider::new(&[("critical_vuln_count", &[Some(0.0)])]);
        let engine = engine(provider);
        let mut tmpl = template(vec![check_spec("vulns", "critical_vuln_count", true, 2)]);
        tmpl.interval_secs = Some(10);

        let mut run = engine.begin_run(&tmpl, 1, 10, 100);
        assert_eq!(run.next_sample_at, 100);
        engine.tick(&mut run, "v2", 100).await;
        assert_eq!(run.next_sample_at, 110);
    }
}
