//! RolloutController — persistence-wrapped reconciliation.
//!
//! The controller owns everything the machine does not: loading and
//! saving rollout records, the per-rollout reconcile lock, the clock,
//! and the periodic sweep that pushes every active rollout through a
//! bounded worker pool. One reconcile is load, one machine tick, save;
//! because the machine keeps its whole state in the persisted status, a
//! controller restarted mid-rollout continues from the stored record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore, watch};
use tracing::{info, warn};

use rollgate_analysis::AnalysisEngine;
use rollgate_metrics::MetricProvider;
use rollgate_rollout::{RolloutMachine, validate_spec};
use rollgate_state::{
    Phase, RevisionHistory, RolloutRecord, RolloutSpec, RolloutStatus, StateStore,
};
use rollgate_traffic::TrafficManager;

use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::counters::ControllerCounters;
use crate::error::{ControllerError, ControllerResult};

/// Drives all rollouts against one state store.
#[derive(Clone)]
pub struct RolloutController {
    store: StateStore,
    machine: RolloutMachine,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    counters: Arc<ControllerCounters>,
    /// Per-rollout reconcile locks: rollout_id → lock.
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RolloutController {
    pub fn new(
        store: StateStore,
        traffic: Arc<dyn TrafficManager>,
        provider: Arc<dyn MetricProvider>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Self {
        let history = RevisionHistory::shared(store.clone(), config.history_retention);
        let engine = AnalysisEngine::new(provider, config.analysis.clone());
        let machine = RolloutMachine::new(traffic, history, engine, config.machine.clone());
        Self {
            store,
            machine,
            clock,
            config,
            counters: Arc::new(ControllerCounters::default()),
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn counters(&self) -> Arc<ControllerCounters> {
        self.counters.clone()
    }

    /// Validate and persist a new rollout in `Initializing`.
    ///
    /// Rejected documents leave no trace in the store. Resubmitting an
    /// identity whose previous rollout went terminal replaces it; an
    /// identity still in flight is refused.
    pub async fn submit(&self, spec: RolloutSpec) -> ControllerResult<String> {
        validate_spec(&spec)?;
        if let Some(existing) = self.store.get_rollout(&spec.id)? {
            if !existing.status.phase.is_terminal() {
                return Err(ControllerError::AlreadyActive(spec.id.clone()));
            }
        }
        let now = self.clock.now_epoch();
        let status = RolloutStatus::new(&spec, now);
        let id = spec.id.clone();
        info!(
            rollout = %id,
            canary = %spec.canary_revision.id,
            steps = spec.steps.len(),
            "rollout submitted"
        );
        self.store.put_rollout(&RolloutRecord { spec, status })?;
        Ok(id)
    }

    /// One reconcile pass: lock, load, tick the machine once, save.
    ///
    /// A rollout already being reconciled is skipped, not queued; the
    /// next sweep retries. Reconciling with no new inputs is a no-op on
    /// the persisted status.
    pub async fn reconcile(&self, id: &str) -> ControllerResult<()> {
        let lock = self.lock_for(id).await;
        let Ok(_guard) = lock.try_lock() else {
            self.counters.record_skip();
            warn!(rollout = %id, "reconcile already in progress; skipping");
            return Err(ControllerError::ReconcileInProgress(id.to_string()));
        };

        let Some(mut record) = self.store.get_rollout(id)? else {
            return Err(ControllerError::NotFound(id.to_string()));
        };
        if record.status.phase.is_terminal() {
            return Ok(());
        }

        let before = record.status.phase;
        let now = self.clock.now_epoch();
        let finished_run = self
            .machine
            .tick(&record.spec, &mut record.status, now)
            .await?;
        if let Some(run) = finished_run {
            self.store
                .append_analysis_record(&run, self.config.analysis_log_cap)?;
            self.counters.record_analysis_run();
        }
        self.store.update_status(id, &record.status)?;
        self.counters.record_reconcile();
        self.note_transition(id, before, record.status.phase);
        Ok(())
    }

    /// Skip the current pause or analysis step. Ignored in any other
    /// phase; the signal never outlives the step it was issued for.
    pub async fn promote_now(&self, id: &str) -> ControllerResult<RolloutStatus> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let Some(mut record) = self.store.get_rollout(id)? else {
            return Err(ControllerError::NotFound(id.to_string()));
        };
        match record.status.phase {
            Phase::Paused | Phase::Analyzing => {
                record.status.promote_requested = true;
                info!(rollout = %id, phase = %record.status.phase, "promote requested");
                let before = record.status.phase;
                let now = self.clock.now_epoch();
                self.machine
                    .tick(&record.spec, &mut record.status, now)
                    .await?;
                self.store.update_status(id, &record.status)?;
                self.note_transition(id, before, record.status.phase);
            }
            phase => {
                warn!(rollout = %id, %phase, "promote ignored; no pause or analysis to skip");
            }
        }
        Ok(record.status)
    }

    /// Abort a rollout with an operator-supplied reason and push the
    /// restore to full stable as far as one tick will take it. A manager
    /// still propagating finishes the restore on later sweeps; the
    /// rollout goes `RolledBack` only once the restore is confirmed.
    pub async fn abort_now(&self, id: &str, reason: &str) -> ControllerResult<RolloutStatus> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let Some(mut record) = self.store.get_rollout(id)? else {
            return Err(ControllerError::NotFound(id.to_string()));
        };
        let before = record.status.phase;
        let now = self.clock.now_epoch();
        self.machine.abort(&record.spec, &mut record.status, reason, now);
        if record.status.phase == Phase::Aborting {
            self.machine
                .tick(&record.spec, &mut record.status, now)
                .await?;
        }
        self.store.update_status(id, &record.status)?;
        self.note_transition(id, before, record.status.phase);
        Ok(record.status)
    }

    /// Identities of rollouts that have not reached a terminal phase.
    pub fn active_rollouts(&self) -> ControllerResult<Vec<String>> {
        let records = self.store.list_rollouts()?;
        Ok(records
            .into_iter()
            .filter(|r| !r.status.phase.is_terminal())
            .map(|r| r.spec.id)
            .collect())
    }

    /// Log the rollouts that will continue from persisted state and
    /// return their identities. Called once at startup; the sweep picks
    /// them up like any other active rollout.
    pub fn resume_active(&self) -> ControllerResult<Vec<String>> {
        let records = self.store.list_rollouts()?;
        let mut resumed = Vec::new();
        for record in records {
            if record.status.phase.is_terminal() {
                continue;
            }
            info!(
                rollout = %record.spec.id,
                phase = %record.status.phase,
                step = record.status.step_index,
                "resuming rollout from persisted state"
            );
            resumed.push(record.spec.id);
        }
        Ok(resumed)
    }

    /// Reconcile every active rollout, at most
    /// `max_concurrent_reconciles` in flight at once.
    pub async fn reconcile_all(&self) {
        let ids = match self.active_rollouts() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not list active rollouts");
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_reconciles));
        let mut handles = Vec::new();
        for id in ids {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let controller = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match controller.reconcile(&id).await {
                    Ok(()) => {}
                    // Skips are logged where they happen.
                    Err(ControllerError::ReconcileInProgress(_)) => {}
                    Err(e) => warn!(rollout = %id, error = %e, "reconcile failed"),
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Periodic sweep loop; exits when `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_interval_secs);
        info!(
            interval_secs = self.config.tick_interval_secs,
            workers = self.config.max_concurrent_reconciles,
            "controller loop started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.reconcile_all().await;
                }
                _ = shutdown.changed() => {
                    info!("controller loop stopping");
                    break;
                }
            }
        }
    }

    fn note_transition(&self, id: &str, before: Phase, after: Phase) {
        if before == after {
            return;
        }
        info!(rollout = %id, from = %before, to = %after, "phase transition");
        match after {
            Phase::Stable => self.counters.record_promotion(),
            Phase::RolledBack => self.counters.record_rollback(),
            _ => {}
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.write().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
