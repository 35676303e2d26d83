//! Rollout spec validation.
//!
//! Runs once at submission; a spec that passes here never produces an
//! `InvalidSpec` later, so the machine can treat its own inputs as
//! well-formed. Rejections carry the offending step or check by name.

use rollgate_state::{RolloutSpec, Step};

use crate::error::{RolloutError, RolloutResult};

fn invalid(msg: impl Into<String>) -> RolloutError {
    RolloutError::InvalidSpec(msg.into())
}

/// Validate a rollout spec before any state is created for it.
///
/// Checks structural rules the machine depends on: a non-empty step
/// sequence, weights within 0-100 and non-decreasing across the
/// sequence (weight only ever moves toward the canary; going backward
/// is an abort, never a step), and analysis steps that reference a
/// resolvable, well-formed template.
pub fn validate_spec(spec: &RolloutSpec) -> RolloutResult<()> {
    if spec.namespace.is_empty() || spec.name.is_empty() {
        return Err(invalid("namespace and name must be non-empty"));
    }
    if spec.stable_revision.id.is_empty() || spec.canary_revision.id.is_empty() {
        return Err(invalid("stable and canary revision ids must be non-empty"));
    }
    if spec.stable_revision.id == spec.canary_revision.id {
        return Err(invalid("stable and canary must be different revisions"));
    }
    if spec.steps.is_empty() {
        return Err(invalid("step sequence must not be empty"));
    }

    let mut last_weight: u8 = 0;
    for (index, step) in spec.steps.iter().enumerate() {
        match step {
            Step::SetWeight { percent } => {
                if *percent > 100 {
                    return Err(invalid(format!(
                        "step {index}: weight {percent} exceeds 100"
                    )));
                }
                if *percent < last_weight {
                    return Err(invalid(format!(
                        "step {index}: weight {percent} decreases from {last_weight}"
                    )));
                }
                last_weight = *percent;
            }
            Step::Pause { .. } => {}
            Step::Analysis { template, count } => {
                if *count == 0 {
                    return Err(invalid(format!("step {index}: sample budget must be >= 1")));
                }
                let Some(tmpl) = spec.analysis_templates.get(template) else {
                    return Err(invalid(format!(
                        "step {index}: unknown analysis template {template:?}"
                    )));
                };
                if tmpl.checks.is_empty() {
                    return Err(invalid(format!("template {template:?} has no checks")));
                }
                if tmpl.interval_secs == Some(0) {
                    return Err(invalid(format!(
                        "template {template:?}: sample interval must be >= 1s"
                    )));
                }
                for check in &tmpl.checks {
                    if check.metric.is_empty() {
                        return Err(invalid(format!(
                            "template {template:?}, check {:?}: metric name is empty",
                            check.name
                        )));
                    }
                    if !check.threshold.is_finite() {
                        return Err(invalid(format!(
                            "template {template:?}, check {:?}: threshold must be finite",
                            check.name
                        )));
                    }
                    if check.min_samples == 0 {
                        return Err(invalid(format!(
                            "template {template:?}, check {:?}: min_samples must be >= 1",
                            check.name
                        )));
                    }
                    if !check.hard && check.max_consecutive_failures == 0 {
                        return Err(invalid(format!(
                            "template {template:?}, check {:?}: soft checks need a failure tolerance",
                            check.name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
