//! RolloutMachine — phase transitions for a single rollout.
//!
//! The machine mutates a [`RolloutStatus`] in place, one bounded action
//! per tick: request or confirm a traffic split, check a pause deadline,
//! advance an analysis run by one sample, or drive an abort's restore to
//! stable. It never sleeps and never spawns; callers own persistence and
//! scheduling. Ticks are idempotent — a rollout with nothing due reports
//! no change.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rollgate_analysis::{failed_check, AnalysisEngine};
use rollgate_state::{
    AnalysisRunRecord, AnalysisRunState, HistoryStore, Phase, RolloutSpec, RolloutStatus, Step,
    TrafficProgress, Verdict,
};
use rollgate_traffic::{TrafficManager, WeightSplit};

use crate::error::{RolloutError, RolloutResult};
use crate::step::validate_spec;

/// Abort reason recorded when the traffic retry budget is exhausted.
pub const REASON_TRAFFIC_APPLY_FAILED: &str = "traffic-apply-failed";

fn default_max_traffic_attempts() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_cap_secs() -> u64 {
    60
}

fn default_max_inconclusive_retries() -> u32 {
    2
}

/// Machine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    /// Failed `set_weights` attempts tolerated per split before the
    /// rollout aborts with [`REASON_TRAFFIC_APPLY_FAILED`].
    #[serde(default = "default_max_traffic_attempts")]
    pub max_traffic_attempts: u32,
    /// First retry delay; doubles per failed attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub traffic_backoff_base_secs: u64,
    /// Ceiling for the retry delay.
    #[serde(default = "default_backoff_cap_secs")]
    pub traffic_backoff_cap_secs: u64,
    /// Inconclusive analysis runs tolerated per step before the rollout
    /// aborts. Inconclusive is treated as failure once exhausted.
    #[serde(default = "default_max_inconclusive_retries")]
    pub max_inconclusive_retries: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_traffic_attempts: default_max_traffic_attempts(),
            traffic_backoff_base_secs: default_backoff_base_secs(),
            traffic_backoff_cap_secs: default_backoff_cap_secs(),
            max_inconclusive_retries: default_max_inconclusive_retries(),
        }
    }
}

/// Where an in-flight traffic request stands after one tick.
enum TrafficStep {
    /// Backing off, or the data plane hasn't converged yet.
    Waiting,
    /// Observed split matches the requested one.
    Confirmed,
    /// Retry budget spent without an accepted request.
    Exhausted,
}

fn canary_split(percent: u8) -> WeightSplit {
    WeightSplit::new(100u8.saturating_sub(percent), percent)
}

/// Arm a fresh traffic request with a clean retry ledger.
fn request_split(status: &mut RolloutStatus, split: WeightSplit, now: u64) {
    status.traffic = TrafficProgress {
        requested: Some((split.stable, split.canary)),
        accepted: false,
        attempts: 0,
        next_attempt_at: now,
    };
}

fn run_record(
    rollout_id: &str,
    step_index: u32,
    run: &AnalysisRunState,
    finished_at: u64,
) -> AnalysisRunRecord {
    AnalysisRunRecord {
        rollout_id: rollout_id.to_string(),
        // The store assigns the real sequence number on append.
        seq: 0,
        template: run.template.clone(),
        step_index,
        attempt: run.attempt,
        verdict: run.verdict,
        started_at: run.started_at,
        finished_at,
        failed_check: failed_check(run).map(|c| c.spec.name.clone()),
        samples_taken: run.samples_taken,
    }
}

/// Drives one rollout through its step sequence.
///
/// Stateless across ticks: everything the machine needs to continue — the
/// current step, in-flight traffic request, pause deadline, analysis run —
/// lives in the [`RolloutStatus`] it is handed, so a rollout can be
/// rehydrated from the store and resumed mid-step.
#[derive(Clone)]
pub struct RolloutMachine {
    traffic: Arc<dyn TrafficManager>,
    history: Arc<dyn HistoryStore>,
    engine: AnalysisEngine,
    config: MachineConfig,
}

impl RolloutMachine {
    pub fn new(
        traffic: Arc<dyn TrafficManager>,
        history: Arc<dyn HistoryStore>,
        engine: AnalysisEngine,
        config: MachineConfig,
    ) -> Self {
        Self {
            traffic,
            history,
            engine,
            config,
        }
    }

    /// Advance the rollout by at most one action. Returns the record of
    /// an analysis run that reached a final verdict during this tick, if
    /// any, for the caller to append to the run log.
    pub async fn tick(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> RolloutResult<Option<AnalysisRunRecord>> {
        match status.phase {
            Phase::Initializing => {
                // On failure the rollout stays in Initializing untouched.
                validate_spec(spec)?;
                info!(rollout = %spec.id, steps = spec.steps.len(), "rollout started");
                self.enter_step(spec, status, 0, now)?;
                Ok(None)
            }
            Phase::Progressing => self.tick_progressing(spec, status, now).await,
            Phase::Paused => self.tick_paused(spec, status, now).map(|_| None),
            Phase::Analyzing => self.tick_analyzing(spec, status, now).await,
            Phase::Promoting => self.tick_promoting(spec, status, now).await.map(|_| None),
            Phase::Aborting => {
                self.tick_aborting(spec, status, now).await;
                Ok(None)
            }
            Phase::Stable | Phase::RolledBack => Ok(None),
        }
    }

    /// Route the rollout toward `RolledBack`: record the reason, cancel
    /// any in-flight pause or analysis, and arm the restore to full
    /// stable. Subsequent ticks drive the restore until it is confirmed.
    /// No-op when already aborting or terminal, so repeated abort
    /// signals keep the first reason.
    pub fn abort(&self, spec: &RolloutSpec, status: &mut RolloutStatus, reason: &str, now: u64) {
        if status.phase.is_terminal() || status.phase == Phase::Aborting {
            return;
        }
        warn!(rollout = %spec.id, phase = %status.phase, reason, "rollout aborting");
        status.abort_reason = Some(reason.to_string());
        status.phase = Phase::Aborting;
        status.step_index = 0;
        status.pause_expires_at = None;
        status.promote_requested = false;
        status.analysis = None;
        status.last_transition = now;
        request_split(status, WeightSplit::full_stable(), now);
    }

    // ── Per-phase ticks ────────────────────────────────────────────

    async fn tick_progressing(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> RolloutResult<Option<AnalysisRunRecord>> {
        if status.traffic.requested.is_none() {
            // Rehydrated without an armed request: re-derive it from the
            // current step, or re-enter the step if the phase is stale.
            match spec.steps.get(status.step_index as usize) {
                Some(Step::SetWeight { percent }) => {
                    request_split(status, canary_split(*percent), now);
                }
                _ => return self.enter_step(spec, status, status.step_index, now).map(|_| None),
            }
        }
        match self.drive_traffic(spec, status, now).await {
            TrafficStep::Confirmed => self.complete_step(spec, status, now).map(|_| None),
            TrafficStep::Waiting => Ok(None),
            TrafficStep::Exhausted => {
                self.abort(spec, status, REASON_TRAFFIC_APPLY_FAILED, now);
                Ok(None)
            }
        }
    }

    fn tick_paused(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> RolloutResult<()> {
        if status.promote_requested {
            status.promote_requested = false;
            status.pause_expires_at = None;
            info!(rollout = %spec.id, step = status.step_index, "pause skipped by promote");
            return self.complete_step(spec, status, now);
        }
        match status.pause_expires_at {
            Some(deadline) if now >= deadline => {
                debug!(rollout = %spec.id, step = status.step_index, "pause elapsed");
                status.pause_expires_at = None;
                self.complete_step(spec, status, now)
            }
            // An indefinite pause waits for an explicit promote signal.
            _ => Ok(()),
        }
    }

    async fn tick_analyzing(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> RolloutResult<Option<AnalysisRunRecord>> {
        if status.promote_requested {
            status.promote_requested = false;
            status.analysis = None;
            info!(rollout = %spec.id, step = status.step_index, "analysis skipped by promote");
            return self.complete_step(spec, status, now).map(|_| None);
        }
        let Some(mut run) = status.analysis.take() else {
            // Analyzing without a run in flight: start one.
            return self.enter_step(spec, status, status.step_index, now).map(|_| None);
        };

        let revision = status.canary_revision.clone();
        let verdict = self.engine.tick(&mut run, &revision, now).await;
        if verdict == Verdict::Pending {
            status.analysis = Some(run);
            return Ok(None);
        }

        let record = run_record(&spec.id, status.step_index, &run, now);
        status.last_verdict = Some(verdict);
        match verdict {
            Verdict::Successful => {
                self.complete_step(spec, status, now)?;
            }
            Verdict::Failed => {
                let reason = match failed_check(&run) {
                    Some(check) => format!(
                        "analysis failed: check {}: {}",
                        check.spec.name,
                        check.failure_reason.as_deref().unwrap_or("policy violated")
                    ),
                    None => "analysis failed".to_string(),
                };
                self.abort(spec, status, &reason, now);
            }
            Verdict::Inconclusive => {
                status.inconclusive_attempts += 1;
                if status.inconclusive_attempts > self.config.max_inconclusive_retries {
                    let reason = format!(
                        "analysis-inconclusive: {} runs without a verdict",
                        status.inconclusive_attempts
                    );
                    self.abort(spec, status, &reason, now);
                } else {
                    warn!(
                        rollout = %spec.id,
                        attempt = status.inconclusive_attempts,
                        "analysis inconclusive; rerunning"
                    );
                    self.enter_step(spec, status, status.step_index, now)?;
                }
            }
            Verdict::Pending => {}
        }
        Ok(Some(record))
    }

    async fn tick_promoting(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> RolloutResult<()> {
        if status.traffic.requested.is_none() {
            request_split(status, WeightSplit::new(0, 100), now);
        }
        match self.drive_traffic(spec, status, now).await {
            TrafficStep::Confirmed => {
                // The outgoing stable revision becomes the rollback target.
                self.history.record_stable(&spec.id, &spec.stable_revision)?;
                status.stable_revision = spec.canary_revision.id.clone();
                status.phase = Phase::Stable;
                status.last_transition = now;
                info!(
                    rollout = %spec.id,
                    revision = %spec.canary_revision.id,
                    "canary promoted to stable"
                );
                Ok(())
            }
            TrafficStep::Waiting => Ok(()),
            TrafficStep::Exhausted => {
                self.abort(spec, status, REASON_TRAFFIC_APPLY_FAILED, now);
                Ok(())
            }
        }
    }

    async fn tick_aborting(&self, spec: &RolloutSpec, status: &mut RolloutStatus, now: u64) {
        if status.traffic.requested.is_none() {
            request_split(status, WeightSplit::full_stable(), now);
        }
        match self.drive_traffic(spec, status, now).await {
            TrafficStep::Confirmed => {
                status.phase = Phase::RolledBack;
                status.last_transition = now;
                info!(
                    rollout = %spec.id,
                    reason = status.abort_reason.as_deref().unwrap_or(""),
                    "rollout rolled back"
                );
            }
            TrafficStep::Waiting => {}
            TrafficStep::Exhausted => {
                // The restore must land before the abort can go terminal;
                // keep trying on a fresh budget at the capped delay.
                warn!(rollout = %spec.id, "restore to stable still failing; retrying");
                status.traffic.attempts = 0;
                status.traffic.next_attempt_at = now + self.config.traffic_backoff_cap_secs;
            }
        }
    }

    // ── Step transitions ───────────────────────────────────────────

    /// Make `index` the current step and set up its phase: arm the
    /// traffic request for a weight step, start the pause clock, or
    /// instantiate an analysis run.
    fn enter_step(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        index: u32,
        now: u64,
    ) -> RolloutResult<()> {
        let Some(step) = spec.steps.get(index as usize) else {
            return Err(RolloutError::InvalidSpec(format!(
                "step index {index} out of range"
            )));
        };
        status.step_index = index;
        status.last_transition = now;
        // A promote signal applies only to the step it was issued for.
        status.promote_requested = false;
        match step {
            Step::SetWeight { percent } => {
                status.phase = Phase::Progressing;
                request_split(status, canary_split(*percent), now);
                debug!(rollout = %spec.id, step = index, weight = percent, "entering weight step");
            }
            Step::Pause { duration_secs } => {
                status.phase = Phase::Paused;
                status.pause_expires_at = duration_secs.map(|d| now + d);
                info!(
                    rollout = %spec.id,
                    step = index,
                    duration_secs = ?duration_secs,
                    "rollout paused"
                );
            }
            Step::Analysis { template, count } => {
                let Some(tmpl) = spec.analysis_templates.get(template) else {
                    return Err(RolloutError::InvalidSpec(format!(
                        "unknown analysis template {template:?}"
                    )));
                };
                status.phase = Phase::Analyzing;
                status.analysis = Some(self.engine.begin_run(
                    tmpl,
                    status.inconclusive_attempts + 1,
                    *count,
                    now,
                ));
            }
        }
        Ok(())
    }

    /// The current step's condition is satisfied: move to the next step,
    /// or to `Promoting` after the last one.
    fn complete_step(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> RolloutResult<()> {
        status.inconclusive_attempts = 0;
        let next = status.step_index + 1;
        if (next as usize) < spec.steps.len() {
            self.enter_step(spec, status, next, now)
        } else {
            status.phase = Phase::Promoting;
            status.last_transition = now;
            request_split(status, WeightSplit::new(0, 100), now);
            info!(rollout = %spec.id, "all steps complete; promoting");
            Ok(())
        }
    }

    // ── Traffic ────────────────────────────────────────────────────

    /// Push the armed request toward the data plane. A split counts as
    /// applied only once the manager reports it, not when it accepts the
    /// request; partial propagation keeps the rollout waiting.
    async fn drive_traffic(
        &self,
        spec: &RolloutSpec,
        status: &mut RolloutStatus,
        now: u64,
    ) -> TrafficStep {
        let Some((stable, canary)) = status.traffic.requested else {
            return TrafficStep::Waiting;
        };
        let target = WeightSplit::new(stable, canary);

        if !status.traffic.accepted {
            if now < status.traffic.next_attempt_at {
                return TrafficStep::Waiting;
            }
            match self.traffic.set_weights(&spec.id, target).await {
                Ok(()) => status.traffic.accepted = true,
                Err(e) => {
                    status.traffic.attempts += 1;
                    if status.traffic.attempts >= self.config.max_traffic_attempts {
                        warn!(
                            rollout = %spec.id,
                            attempts = status.traffic.attempts,
                            error = %e,
                            "traffic apply retries exhausted"
                        );
                        return TrafficStep::Exhausted;
                    }
                    let delay = self.backoff(status.traffic.attempts);
                    status.traffic.next_attempt_at = now + delay;
                    warn!(
                        rollout = %spec.id,
                        attempt = status.traffic.attempts,
                        retry_in_secs = delay,
                        error = %e,
                        "traffic apply failed"
                    );
                    return TrafficStep::Waiting;
                }
            }
        }

        match self.traffic.get_weights(&spec.id).await {
            Ok(observed) if observed == target => {
                status.stable_weight = observed.stable;
                status.canary_weight = observed.canary;
                status.traffic = TrafficProgress::default();
                debug!(rollout = %spec.id, split = %observed, "traffic split confirmed");
                TrafficStep::Confirmed
            }
            Ok(observed) => {
                debug!(
                    rollout = %spec.id,
                    requested = %target,
                    %observed,
                    "waiting for traffic propagation"
                );
                TrafficStep::Waiting
            }
            Err(e) => {
                warn!(rollout = %spec.id, error = %e, "could not read traffic split");
                TrafficStep::Waiting
            }
        }
    }

    fn backoff(&self, attempts: u32) -> u64 {
        let exp = attempts.saturating_sub(1).min(6);
        (self.config.traffic_backoff_base_secs << exp).min(self.config.traffic_backoff_cap_secs)
    }
}
