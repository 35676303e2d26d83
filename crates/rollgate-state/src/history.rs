//! Revision history — rollback targets for promoted rollouts.
//!
//! At each promotion the rollout state machine records the revision that
//! is being replaced, through the [`HistoryStore`] trait rather than the
//! tables directly; that keeps the machine testable against an in-memory
//! store and leaves the retention policy with the owner of the store.

use std::sync::Arc;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::Revision;

/// Ordered log of past stable revisions, newest last. The latest entry
/// is the rollback target.
///
/// Implementations must be safe to share across controller workers; all
/// methods are `&self`.
pub trait HistoryStore: Send + Sync {
    /// Record `revision` as a former stable revision of `rollout_id`.
    /// Returns the assigned sequence number.
    fn record_stable(&self, rollout_id: &str, revision: &Revision) -> StateResult<u64>;

    /// The most recently promoted revision, if any. This is the rollback
    /// target for a future rollout of the same identity.
    fn latest_stable(&self, rollout_id: &str) -> StateResult<Option<Revision>>;

    /// Promoted revisions, newest first, up to `limit`.
    fn list_stable(&self, rollout_id: &str, limit: usize) -> StateResult<Vec<Revision>>;
}

/// Store-backed [`HistoryStore`] with a fixed per-rollout retention.
#[derive(Clone)]
pub struct RevisionHistory {
    store: StateStore,
    retention: usize,
}

impl RevisionHistory {
    pub fn new(store: StateStore, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Convenience constructor for the common shared-handle case.
    pub fn shared(store: StateStore, retention: usize) -> Arc<dyn HistoryStore> {
        Arc::new(Self::new(store, retention))
    }
}

impl HistoryStore for RevisionHistory {
    fn record_stable(&self, rollout_id: &str, revision: &Revision) -> StateResult<u64> {
        self.store.push_revision(rollout_id, revision, self.retention)
    }

    fn latest_stable(&self, rollout_id: &str) -> StateResult<Option<Revision>> {
        self.store.latest_revision(rollout_id)
    }

    fn list_stable(&self, rollout_id: &str, limit: usize) -> StateResult<Vec<Revision>> {
        self.store.list_revisions(rollout_id, limit)
    }
}
