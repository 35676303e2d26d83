//! LocalTrafficManager — in-process traffic splits with simulated lag.
//!
//! Holds splits in a shared route table. Propagation lag is modeled in
//! polls: a newly requested split becomes observable only after the entry
//! has been polled `lag_polls` times, which mirrors a data plane that
//! converges asynchronously. With a lag of zero, requests apply instantly.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{TrafficError, TrafficResult};
use crate::manager::{TrafficManager, WeightSplit};

#[derive(Debug)]
struct RouteEntry {
    observed: WeightSplit,
    pending: Option<WeightSplit>,
    polls_until_applied: u32,
}

impl RouteEntry {
    fn settled() -> Self {
        Self {
            observed: WeightSplit::full_stable(),
            pending: None,
            polls_until_applied: 0,
        }
    }
}

/// In-process [`TrafficManager`] keyed by rollout identity.
pub struct LocalTrafficManager {
    routes: RwLock<HashMap<String, RouteEntry>>,
    lag_polls: u32,
}

impl LocalTrafficManager {
    /// Manager with no propagation lag: splits apply on request.
    pub fn new() -> Self {
        Self::with_lag(0)
    }

    /// Manager whose splits become observable only after `lag_polls`
    /// calls to `get_weights` for that rollout.
    pub fn with_lag(lag_polls: u32) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            lag_polls,
        }
    }
}

impl Default for LocalTrafficManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrafficManager for LocalTrafficManager {
    async fn set_weights(&self, rollout_id: &str, split: WeightSplit) -> TrafficResult<()> {
        if !split.is_valid() {
            return Err(TrafficError::apply_failed(
                rollout_id,
                format!("split {split} does not sum to 100"),
            ));
        }

        let mut routes = self.routes.write().await;
        let entry = routes
            .entry(rollout_id.to_string())
            .or_insert_with(RouteEntry::settled);

        if entry.observed == split && entry.pending.is_none() {
            debug!(%rollout_id, %split, "traffic split already applied");
            return Ok(());
        }

        if self.lag_polls == 0 {
            entry.observed = split;
            entry.pending = None;
            entry.polls_until_applied = 0;
        } else {
            // A newer request supersedes any split still propagating.
            entry.pending = Some(split);
            entry.polls_until_applied = self.lag_polls;
        }
        info!(%rollout_id, %split, lag_polls = self.lag_polls, "traffic split requested");
        Ok(())
    }

    async fn get_weights(&self, rollout_id: &str) -> TrafficResult<WeightSplit> {
        let mut routes = self.routes.write().await;
        let Some(entry) = routes.get_mut(rollout_id) else {
            return Ok(WeightSplit::full_stable());
        };

        if let Some(pending) = entry.pending {
            entry.polls_until_applied = entry.polls_until_applied.saturating_sub(1);
            if entry.polls_until_applied == 0 {
                entry.observed = pending;
                entry.pending = None;
                debug!(%rollout_id, split = %pending, "traffic split propagated");
            }
        }
        Ok(entry.observed)
    }
}
