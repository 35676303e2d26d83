//! Per-check sample evaluation.
//!
//! Each check keeps consecutive pass/fail/missing streaks across the
//! samples of one run. A missing sample interrupts neither streak; it
//! only grows its own counter, which the engine compares against the
//! run-wide missing limit.

use tracing::{debug, warn};

use rollgate_state::{CheckProgress, CheckState, SampleRecord, SampleVerdict};

/// Record one sampled value (or its absence) against a check and update
/// its state. Returns the verdict of this individual sample.
///
/// Calls on an already-resolved check are no-ops so ticks stay idempotent.
pub fn observe(check: &mut CheckProgress, at: u64, value: Option<f64>) -> SampleVerdict {
    if check.state != CheckState::Pending {
        return SampleVerdict::Missing;
    }

    let verdict = match value {
        Some(v) if check.spec.op.holds(v, check.spec.threshold) => {
            check.consecutive_passes += 1;
            check.consecutive_failures = 0;
            check.consecutive_missing = 0;

            if check.consecutive_passes >= check.spec.min_samples {
                debug!(
                    check = %check.spec.name,
                    passes = check.consecutive_passes,
                    "check passed"
                );
                check.state = CheckState::Passed;
            }
            SampleVerdict::Pass
        }
        Some(v) => {
            check.consecutive_failures += 1;
            check.consecutive_passes = 0;
            check.consecutive_missing = 0;

            if check.spec.hard {
                check.state = CheckState::Failed;
                check.failure_reason = Some(format!(
                    "{} {} {} violated by sample {v}",
                    check.spec.metric, check.spec.op, check.spec.threshold
                ));
                warn!(
                    check = %check.spec.name,
                    value = v,
                    threshold = check.spec.threshold,
                    "hard check failed"
                );
            } else if check.consecutive_failures >= check.spec.max_consecutive_failures {
                check.state = CheckState::Failed;
                check.failure_reason = Some(format!(
                    "{} consecutive failing samples (limit {})",
                    check.consecutive_failures, check.spec.max_consecutive_failures
                ));
                warn!(
                    check = %check.spec.name,
                    failures = check.consecutive_failures,
                    "soft check exhausted its failure tolerance"
                );
            }
            SampleVerdict::Fail
        }
        None => {
            // Neither pass nor fail; pass/fail streaks are preserved.
            check.consecutive_missing += 1;
            debug!(
                check = %check.spec.name,
                missing = check.consecutive_missing,
                "no sample for tick"
            );
            SampleVerdict::Missing
        }
    };

    check.samples.push(SampleRecord { at, value, verdict });
    verdict
}
