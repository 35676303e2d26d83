//! rollgate-analysis — metric-gated verdicts for rollout steps.
//!
//! The [`AnalysisEngine`] drives resumable analysis runs: it instantiates
//! a run from a template, then advances it one sample tick at a time. All
//! run state (streaks, sample history, the next-tick deadline) lives in
//! the serializable [`rollgate_state::AnalysisRunState`], so a run can be
//! persisted mid-flight and resumed after a restart without losing any
//! progress. The engine itself is stateless between ticks.
//!
//! Verdict policy:
//! - a check passes after `min_samples` consecutive passing samples;
//! - a hard check fails the run on its first failing sample;
//! - a soft check fails after `max_consecutive_failures` consecutive
//!   failing samples;
//! - missing samples (no data, provider down) preserve streaks but drive
//!   the run inconclusive once they persist, as does an exhausted sample
//!   budget. Inconclusive is never silently upgraded to success.

pub mod check;
pub mod engine;

pub use engine::{failed_check, AnalysisEngine, EngineConfig};
