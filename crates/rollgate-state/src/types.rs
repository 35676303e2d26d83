//! Domain types for the rollgate state store.
//!
//! These types represent the persisted state of rollouts: the immutable
//! spec submitted by an orchestrator, the mutable status owned by the
//! controller, completed analysis-run records, stable-revision history,
//! and ingested metric samples. All types are serializable to/from JSON
//! for storage in redb tables.
//!
//! The status carries every suspension point of the rollout state machine
//! (pause deadline, next analysis sample tick, traffic retry schedule) so
//! a rollout can be rehydrated from the store and resumed at any time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a rollout (namespace-scoped, `{namespace}/{name}`).
pub type RolloutId = String;

// ── Revision ──────────────────────────────────────────────────────

/// An immutable workload version: identifier plus image metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revision {
    /// Revision identifier (e.g. a deploy tag or template hash).
    pub id: String,
    /// Image reference this revision runs.
    pub image: String,
    /// Unix timestamp (seconds) when this revision was created.
    pub created_at: u64,
}

// ── Steps ─────────────────────────────────────────────────────────

/// One step of a rollout's traffic-shifting sequence.
///
/// Steps are immutable once a rollout starts and are walked strictly in
/// order; only an abort moves the rollout backwards (to full stable).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Shift the canary to the given traffic percentage (0-100).
    SetWeight { percent: u8 },
    /// Hold at the current weight. `None` pauses until an explicit
    /// promote signal.
    Pause { duration_secs: Option<u64> },
    /// Gate advancement on an analysis run of the named template.
    /// `count` is the run's sample budget per check.
    Analysis { template: String, count: u32 },
}

// ── Analysis templates ────────────────────────────────────────────

/// Comparison operator applied to a metric sample against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOp {
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
}

impl CheckOp {
    /// Apply the operator: does `value op threshold` hold?
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            CheckOp::Le => value <= threshold,
            CheckOp::Lt => value < threshold,
            CheckOp::Ge => value >= threshold,
            CheckOp::Gt => value > threshold,
            CheckOp::Eq => value == threshold,
        }
    }
}

impl fmt::Display for CheckOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckOp::Le => "<=",
            CheckOp::Lt => "<",
            CheckOp::Ge => ">=",
            CheckOp::Gt => ">",
            CheckOp::Eq => "==",
        };
        f.write_str(s)
    }
}

/// A single metric check inside an analysis template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckSpec {
    /// Check name, referenced in abort reasons and run records.
    pub name: String,
    /// Metric queried from the provider (e.g. `critical_vuln_count`).
    pub metric: String,
    /// Comparison operator.
    pub op: CheckOp,
    /// Threshold the sampled value is compared against. No unit
    /// conversion is performed; provider and threshold must agree.
    pub threshold: f64,
    /// A hard check fails the run on its first failing sample.
    pub hard: bool,
    /// Consecutive passing samples required before the check passes.
    pub min_samples: u32,
    /// For soft checks: consecutive failing samples tolerated before
    /// the check fails. Ignored when `hard` is set.
    pub max_consecutive_failures: u32,
}

/// Named, ordered set of checks gating one analysis step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisTemplate {
    pub name: String,
    pub checks: Vec<CheckSpec>,
    /// Seconds between samples for runs of this template. Falls back to
    /// the engine-wide default when unset.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

// ── Rollout spec ──────────────────────────────────────────────────

/// Specification for one rollout, immutable after submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutSpec {
    pub id: RolloutId,
    pub namespace: String,
    pub name: String,
    /// Revision currently receiving stable traffic.
    pub stable_revision: Revision,
    /// Revision being rolled out.
    pub canary_revision: Revision,
    /// Desired replica count for the workload.
    pub replicas: u32,
    /// Ordered traffic-shifting sequence.
    pub steps: Vec<Step>,
    /// Templates referenced by `Step::Analysis`, keyed by name.
    pub analysis_templates: HashMap<String, AnalysisTemplate>,
    /// Unix timestamp (seconds) when this spec was submitted.
    pub created_at: u64,
}

impl RolloutSpec {
    /// Build the composite key for the rollouts table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ── Rollout status ────────────────────────────────────────────────

/// Lifecycle phase of a rollout.
///
/// The step index lives in [`RolloutStatus`], not in the variant, so the
/// phase stays cheap to match and persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Submitted, not yet started.
    Initializing,
    /// Applying the current step (weight shift in flight).
    Progressing,
    /// Holding on a pause step.
    Paused,
    /// An analysis run is gating the current step.
    Analyzing,
    /// Final promotion: shifting to 100% canary and recording history.
    Promoting,
    /// Abort requested; restoring 100% stable before going terminal.
    Aborting,
    /// Terminal: canary promoted, now the stable revision.
    Stable,
    /// Terminal: aborted and restored to the prior stable revision.
    RolledBack,
}

impl Phase {
    /// Terminal phases accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Stable | Phase::RolledBack)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Initializing => "initializing",
            Phase::Progressing => "progressing",
            Phase::Paused => "paused",
            Phase::Analyzing => "analyzing",
            Phase::Promoting => "promoting",
            Phase::Aborting => "aborting",
            Phase::Stable => "stable",
            Phase::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Retry ledger for an in-flight `set_weights` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TrafficProgress {
    /// The (stable, canary) split currently in flight, if any. Cleared
    /// once the observed split matches.
    pub requested: Option<(u8, u8)>,
    /// Whether the manager accepted the request. Once set, the machine
    /// only polls for confirmation and never re-requests, so a lagging
    /// data plane is not restarted mid-propagation.
    pub accepted: bool,
    /// Failed apply attempts so far for the current request.
    pub attempts: u32,
    /// Unix timestamp before which no retry is attempted (backoff).
    pub next_attempt_at: u64,
}

/// Mutable status of a rollout, owned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutStatus {
    pub phase: Phase,
    /// Index into the spec's step list. Monotonically non-decreasing
    /// except on abort.
    pub step_index: u32,
    /// Currently applied stable-traffic percentage.
    pub stable_weight: u8,
    /// Currently applied canary-traffic percentage.
    pub canary_weight: u8,
    /// Revision id currently considered stable (swapped on promotion).
    pub stable_revision: String,
    /// Revision id under rollout.
    pub canary_revision: String,
    /// Unix timestamp of the last phase transition.
    pub last_transition: u64,
    /// Human-readable abort reason, set once on abort.
    pub abort_reason: Option<String>,
    /// Deadline for the current pause step. `None` while paused means
    /// the pause is indefinite (waits for a promote signal).
    pub pause_expires_at: Option<u64>,
    /// Set by `PromoteNow`; consumed when the current step is skipped.
    pub promote_requested: bool,
    /// Bounded-backoff state for the in-flight weight change.
    pub traffic: TrafficProgress,
    /// Live analysis run for the current step, if any.
    pub analysis: Option<AnalysisRunState>,
    /// Inconclusive re-run attempts consumed for the current step.
    pub inconclusive_attempts: u32,
    /// Verdict of the most recently finished analysis run.
    pub last_verdict: Option<Verdict>,
}

impl RolloutStatus {
    /// Fresh status for a just-submitted rollout: full stable traffic,
    /// nothing in flight.
    pub fn new(spec: &RolloutSpec, now: u64) -> Self {
        Self {
            phase: Phase::Initializing,
            step_index: 0,
            stable_weight: 100,
            canary_weight: 0,
            stable_revision: spec.stable_revision.id.clone(),
            canary_revision: spec.canary_revision.id.clone(),
            last_transition: now,
            abort_reason: None,
            pause_expires_at: None,
            promote_requested: false,
            traffic: TrafficProgress::default(),
            analysis: None,
            inconclusive_attempts: 0,
            last_verdict: None,
        }
    }
}

// ── Analysis runs ─────────────────────────────────────────────────

/// Aggregate verdict of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Successful,
    Failed,
    Inconclusive,
}

impl Verdict {
    /// Final verdicts end the run; `Pending` keeps sampling.
    pub fn is_final(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pending => "pending",
            Verdict::Successful => "successful",
            Verdict::Failed => "failed",
            Verdict::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}

/// Outcome of a single metric sample against one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleVerdict {
    Pass,
    Fail,
    /// Provider had no data point (or was unavailable) for this tick.
    /// Neither pass nor fail; streaks are preserved.
    Missing,
}

/// One recorded sample: when it was taken, what the provider returned,
/// and how it compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleRecord {
    pub at: u64,
    pub value: Option<f64>,
    pub verdict: SampleVerdict,
}

/// Per-check resolution inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Passed,
    Failed,
}

/// Live progress of one check within an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckProgress {
    pub spec: CheckSpec,
    pub state: CheckState,
    /// Why the check failed, when it did.
    pub failure_reason: Option<String>,
    pub consecutive_passes: u32,
    pub consecutive_failures: u32,
    pub consecutive_missing: u32,
    /// Ordered sample history for this run.
    pub samples: Vec<SampleRecord>,
}

impl CheckProgress {
    /// Fresh progress for a check at run start.
    pub fn new(spec: CheckSpec) -> Self {
        Self {
            spec,
            state: CheckState::Pending,
            failure_reason: None,
            consecutive_passes: 0,
            consecutive_failures: 0,
            consecutive_missing: 0,
            samples: Vec::new(),
        }
    }
}

/// Resumable state of an in-flight analysis run.
///
/// `next_sample_at` is the run's explicit suspension point: the engine
/// only samples when the controller ticks it past that timestamp, so the
/// run survives restarts and never needs a live callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRunState {
    /// Template this run was instantiated from.
    pub template: String,
    /// 1-based attempt number for the owning step (inconclusive re-runs
    /// increment this).
    pub attempt: u32,
    pub started_at: u64,
    /// Samples allowed per check before a pending run goes inconclusive.
    pub sample_budget: u32,
    pub samples_taken: u32,
    /// Seconds between sample ticks, resolved from the template at run
    /// start so resumed runs keep their cadence.
    pub interval_secs: u64,
    /// Next tick at which the engine should sample.
    pub next_sample_at: u64,
    pub verdict: Verdict,
    pub checks: Vec<CheckProgress>,
}

/// Summary of a completed analysis run, appended to the per-rollout log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRunRecord {
    pub rollout_id: RolloutId,
    /// Store-assigned sequence number within the rollout's log.
    pub seq: u64,
    pub template: String,
    pub step_index: u32,
    pub attempt: u32,
    pub verdict: Verdict,
    pub started_at: u64,
    pub finished_at: u64,
    /// Name of the check that failed the run, if any.
    pub failed_check: Option<String>,
    pub samples_taken: u32,
}

// ── Metric samples ────────────────────────────────────────────────

/// One ingested signal point for a revision (error rate, p95 latency,
/// critical-vulnerability count, policy violations, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    /// Revision the sample was measured against.
    pub revision: String,
    /// Metric name, matched byte-for-byte by checks.
    pub metric: String,
    /// Unix timestamp (seconds) of the measurement.
    pub at: u64,
    pub value: f64,
}

impl MetricSample {
    /// Build the composite key for the metric samples table.
    pub fn table_key(&self) -> String {
        format!("{}:{}:{:012}", self.revision, self.metric, self.at)
    }
}

// ── Rollout record ────────────────────────────────────────────────

/// The unit of persistence: one record per rollout identity holding the
/// immutable spec and the mutable status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutRecord {
    pub spec: RolloutSpec,
    pub status: RolloutStatus,
}
