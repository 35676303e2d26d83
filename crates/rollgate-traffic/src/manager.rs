//! TrafficManager — the seam between the rollout machine and the data plane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TrafficResult;

/// A stable/canary traffic split in whole percentage points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSplit {
    pub stable: u8,
    pub canary: u8,
}

impl WeightSplit {
    pub const fn new(stable: u8, canary: u8) -> Self {
        Self { stable, canary }
    }

    /// The split every rollout starts from: all traffic on stable.
    pub const fn full_stable() -> Self {
        Self {
            stable: 100,
            canary: 0,
        }
    }

    /// A valid split routes every request somewhere: weights sum to 100.
    pub fn is_valid(&self) -> bool {
        self.stable as u16 + self.canary as u16 == 100
    }
}

impl fmt::Display for WeightSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stable, self.canary)
    }
}

/// Applies and reports traffic splits for rollout identities.
///
/// `set_weights` is asynchronous in effect as well as in signature: a
/// successful return means the request was accepted, not that the data
/// plane converged. Callers poll [`get_weights`](Self::get_weights) and
/// treat `observed == requested` as confirmation.
#[async_trait]
pub trait TrafficManager: Send + Sync {
    /// Request the given split for a rollout. The split must sum to 100.
    async fn set_weights(&self, rollout_id: &str, split: WeightSplit) -> TrafficResult<()>;

    /// The currently observed split for a rollout. Identities that never
    /// had a split applied report [`WeightSplit::full_stable`].
    async fn get_weights(&self, rollout_id: &str) -> TrafficResult<WeightSplit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_validity() {
        assert!(WeightSplit::new(90, 10).is_valid());
        assert!(WeightSplit::full_stable().is_valid());
        assert!(!WeightSplit::new(50, 40).is_valid());
        assert!(!WeightSplit::new(100, 100).is_valid());
    }

    #[test]
    fn split_display() {
        assert_eq!(WeightSplit::new(90, 10).to_string(), "90/10");
    }
}
