//! StateStore — redb-backed persistence for rollgate.
//!
//! Holds one record per rollout (spec plus status), a capped stable-revision
//! history and analysis-run log per rollout, and ingested metric samples.
//! All values are JSON-serialized into redb's `&[u8]` value columns. Keys
//! embed zero-padded sequence numbers and timestamps so lexicographic table
//! order matches insertion order, which makes prefix range scans cheap.
//!
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// Collect all keys under a prefix, in table (ascending) order.
fn keys_with_prefix<T>(table: &T, prefix: &str) -> StateResult<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, _) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

/// Decode all values under a prefix, in table (ascending) order.
fn records_with_prefix<T, R>(table: &T, prefix: &str) -> StateResult<Vec<R>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    R: DeserializeOwned,
{
    let mut records = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        records.push(serde_json::from_slice(value.value())?);
    }
    Ok(records)
}

/// Next sequence number after the (zero-padded, hence lexicographically
/// last) newest key, or 0 for an empty history.
fn next_seq(existing: &[String]) -> u64 {
    existing
        .last()
        .and_then(|key| key.rsplit(':').next())
        .and_then(|seq| seq.parse::<u64>().ok())
        .map(|seq| seq + 1)
        .unwrap_or(0)
}

fn revision_key(rollout_id: &str, seq: u64) -> String {
    format!("{rollout_id}:{seq:08}")
}

fn analysis_key(rollout_id: &str, seq: u64) -> String {
    format!("{rollout_id}:{seq:08}")
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ROLLOUTS)?;
        txn.open_table(REVISIONS)?;
        txn.open_table(ANALYSIS_LOG)?;
        txn.open_table(METRIC_SAMPLES)?;
        txn.commit()?;
        Ok(())
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert or replace a rollout record (spec and status together).
    pub fn put_rollout(&self, record: &RolloutRecord) -> StateResult<()> {
        let key = record.spec.table_key();
        let value = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ROLLOUTS)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        debug!(%key, phase = %record.status.phase, "rollout stored");
        Ok(())
    }

    /// Get a rollout by its `namespace/name` key.
    pub fn get_rollout(&self, key: &str) -> StateResult<Option<RolloutRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ROLLOUTS)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all rollout records.
    pub fn list_rollouts(&self) -> StateResult<Vec<RolloutRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ROLLOUTS)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    /// Replace the status of an existing rollout. The spec is left
    /// untouched. Fails with [`StateError::NotFound`] if the rollout
    /// does not exist.
    pub fn update_status(&self, key: &str, status: &RolloutStatus) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ROLLOUTS)?;
            let mut record: RolloutRecord = match table.get(key)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => return Err(StateError::NotFound(key.to_string())),
            };
            record.status = status.clone();
            let value = serde_json::to_vec(&record)?;
            table.insert(key, value.as_slice())?;
        }
        txn.commit()?;
        debug!(%key, phase = %status.phase, "rollout status updated");
        Ok(())
    }

    /// Delete a rollout and its revision history and analysis log.
    /// Metric samples are revision-scoped and are left in place.
    /// Returns true if the rollout existed.
    pub fn delete_rollout(&self, key: &str) -> StateResult<bool> {
        let prefix = format!("{key}:");
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(ROLLOUTS)?;
            existed = table.remove(key)?.is_some();
        }
        {
            let mut table = txn.open_table(REVISIONS)?;
            for old in keys_with_prefix(&table, &prefix)? {
                table.remove(old.as_str())?;
            }
        }
        {
            let mut table = txn.open_table(ANALYSIS_LOG)?;
            for old in keys_with_prefix(&table, &prefix)? {
                table.remove(old.as_str())?;
            }
        }
        txn.commit()?;
        debug!(%key, existed, "rollout deleted");
        Ok(existed)
    }

    // ── Revision history ───────────────────────────────────────────

    /// Append a revision to a rollout's stable history, assigning the
    /// next sequence number. Entries beyond `retention` are rotated out
    /// oldest-first in the same transaction. Returns the assigned seq.
    pub fn push_revision(
        &self,
        rollout_id: &str,
        revision: &Revision,
        retention: usize,
    ) -> StateResult<u64> {
        let prefix = format!("{rollout_id}:");
        let value = serde_json::to_vec(revision)?;
        let txn = self.db.begin_write()?;
        let seq;
        {
            let mut table = txn.open_table(REVISIONS)?;
            let existing = keys_with_prefix(&table, &prefix)?;
            seq = next_seq(&existing);
            let key = revision_key(rollout_id, seq);
            table.insert(key.as_str(), value.as_slice())?;
            if existing.len() + 1 > retention {
                let excess = existing.len() + 1 - retention;
                for old in existing.iter().take(excess) {
                    table.remove(old.as_str())?;
                }
            }
        }
        txn.commit()?;
        debug!(%rollout_id, seq, revision = %revision.id, "stable revision recorded");
        Ok(seq)
    }

    /// The newest entry of a rollout's stable history, if any.
    pub fn latest_revision(&self, rollout_id: &str) -> StateResult<Option<Revision>> {
        let prefix = format!("{rollout_id}:");
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REVISIONS)?;
        let revisions: Vec<Revision> = records_with_prefix(&table, &prefix)?;
        Ok(revisions.into_iter().next_back())
    }

    /// List a rollout's stable history, newest first, up to `limit`.
    pub fn list_revisions(&self, rollout_id: &str, limit: usize) -> StateResult<Vec<Revision>> {
        let prefix = format!("{rollout_id}:");
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REVISIONS)?;
        let mut revisions: Vec<Revision> = records_with_prefix(&table, &prefix)?;
        revisions.reverse();
        revisions.truncate(limit);
        Ok(revisions)
    }

    // ── Analysis log ───────────────────────────────────────────────

    /// Append a completed analysis run to a rollout's log, assigning the
    /// next sequence number. Entries beyond `cap` are rotated out
    /// oldest-first in the same transaction. Returns the assigned seq.
    pub fn append_analysis_record(
        &self,
        record: &AnalysisRunRecord,
        cap: usize,
    ) -> StateResult<u64> {
        let prefix = format!("{}:", record.rollout_id);
        let txn = self.db.begin_write()?;
        let seq;
        {
            let mut table = txn.open_table(ANALYSIS_LOG)?;
            let existing = keys_with_prefix(&table, &prefix)?;
            seq = next_seq(&existing);
            let mut stamped = record.clone();
            stamped.seq = seq;
            let key = analysis_key(&record.rollout_id, seq);
            let value = serde_json::to_vec(&stamped)?;
            table.insert(key.as_str(), value.as_slice())?;
            if existing.len() + 1 > cap {
                let excess = existing.len() + 1 - cap;
                for old in existing.iter().take(excess) {
                    table.remove(old.as_str())?;
                }
            }
        }
        txn.commit()?;
        debug!(
            rollout_id = %record.rollout_id,
            seq,
            template = %record.template,
            verdict = %record.verdict,
            "analysis run recorded"
        );
        Ok(seq)
    }

    /// List a rollout's analysis runs, newest first, up to `limit`.
    pub fn list_analysis_records(
        &self,
        rollout_id: &str,
        limit: usize,
    ) -> StateResult<Vec<AnalysisRunRecord>> {
        let prefix = format!("{rollout_id}:");
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ANALYSIS_LOG)?;
        let mut records: Vec<AnalysisRunRecord> = records_with_prefix(&table, &prefix)?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    // ── Metric samples ─────────────────────────────────────────────

    /// Insert one ingested metric sample.
    pub fn put_metric_sample(&self, sample: &MetricSample) -> StateResult<()> {
        let key = sample.table_key();
        let value = serde_json::to_vec(sample)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(METRIC_SAMPLES)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// The most recent sample for `revision`/`metric` with a timestamp
    /// in `[start, end]`, or `None` if the window holds no data.
    pub fn latest_metric_in_window(
        &self,
        revision: &str,
        metric: &str,
        start: u64,
        end: u64,
    ) -> StateResult<Option<MetricSample>> {
        let lo = format!("{revision}:{metric}:{start:012}");
        let hi = format!("{revision}:{metric}:{end:012}");
        let txn = self.db.begin_read()?;
        let table = txn.open_table(METRIC_SAMPLES)?;
        let mut latest = None;
        for entry in table.range(lo.as_str()..=hi.as_str())? {
            let (_, value) = entry?;
            latest = Some(serde_json::from_slice(value.value())?);
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_spec(namespace: &str, name: &str) -> RolloutSpec {
        let template = AnalysisTemplate {
            name: "security-baseline".to_string(),
            checks: vec![CheckSpec {
                name: "no-critical-vulns".to_string(),
                metric: "critical_vuln_count".to_string(),
                op: CheckOp::Le,
                threshold: 0.0,
                hard: true,
                min_samples: 3,
                max_consecutive_failures: 2,
            }],
            interval_secs: None,
        };
        RolloutSpec {
            id: format!("{namespace}/{name}"),
            namespace: namespace.to_string(),
            name: name.to_string(),
            stable_revision: Revision {
                id: "v1".to_string(),
                image: format!("registry/{name}:v1"),
                created_at: 500,
            },
            canary_revision: Revision {
                id: "v2".to_string(),
                image: format!("registry/{name}:v2"),
                created_at: 900,
            },
            replicas: 3,
            steps: vec![
                Step::SetWeight { percent: 10 },
                Step::Analysis {
                    template: "security-baseline".to_string(),
                    count: 5,
                },
                Step::SetWeight { percent: 100 },
            ],
            analysis_templates: HashMap::from([("security-baseline".to_string(), template)]),
            created_at: 1000,
        }
    }

    fn sample_record(namespace: &str, name: &str) -> RolloutRecord {
        let spec = sample_spec(namespace, name);
        let status = RolloutStatus::new(&spec, 1000);
        RolloutRecord { spec, status }
    }

    fn sample_revision(id: &str, created_at: u64) -> Revision {
        Revision {
            id: id.to_string(),
            image: format!("registry/app:{id}"),
            created_at,
        }
    }

    fn sample_run(rollout_id: &str, verdict: Verdict, started_at: u64) -> AnalysisRunRecord {
        AnalysisRunRecord {
            rollout_id: rollout_id.to_string(),
            seq: 0,
            template: "security-baseline".to_string(),
            step_index: 1,
            attempt: 1,
            verdict,
            started_at,
            finished_at: started_at + 90,
            failed_check: None,
            samples_taken: 3,
        }
    }

    // ── Rollout CRUD ───────────────────────────────────────────────

    #[test]
    fn rollout_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = sample_record("prod", "gateway");

        store.put_rollout(&record).unwrap();
        let retrieved = store.get_rollout("prod/gateway").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn rollout_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_rollout("nope/nothing").unwrap().is_none());
    }

    #[test]
    fn rollout_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_rollout(&sample_record("ns1", "a")).unwrap();
        store.put_rollout(&sample_record("ns1", "b")).unwrap();
        store.put_rollout(&sample_record("ns2", "c")).unwrap();

        let all = store.list_rollouts().unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn rollout_status_update_persists() {
        let store = StateStore::open_in_memory().unwrap();
        let record = sample_record("prod", "gateway");
        store.put_rollout(&record).unwrap();

        let mut status = record.status.clone();
        status.phase = Phase::Progressing;
        status.canary_weight = 10;
        status.stable_weight = 90;
        store.update_status("prod/gateway", &status).unwrap();

        let retrieved = store.get_rollout("prod/gateway").unwrap().unwrap();
        assert_eq!(retrieved.status.phase, Phase::Progressing);
        assert_eq!(retrieved.status.canary_weight, 10);
        // Spec untouched.
        assert_eq!(retrieved.spec, record.spec);
    }

    #[test]
    fn status_update_on_missing_rollout_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let record = sample_record("prod", "gateway");

        let err = store
            .update_status("prod/gateway", &record.status)
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn rollout_delete_clears_history() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_rollout(&sample_record("prod", "gateway")).unwrap();
        store
            .push_revision("prod/gateway", &sample_revision("v1", 500), 10)
            .unwrap();
        store
            .append_analysis_record(&sample_run("prod/gateway", Verdict::Successful, 1100), 10)
            .unwrap();

        assert!(store.delete_rollout("prod/gateway").unwrap());
        assert!(!store.delete_rollout("prod/gateway").unwrap());
        assert!(store.get_rollout("prod/gateway").unwrap().is_none());
        assert!(store.list_revisions("prod/gateway", 10).unwrap().is_empty());
        assert!(store
            .list_analysis_records("prod/gateway", 10)
            .unwrap()
            .is_empty());
    }

    // ── Revision history ───────────────────────────────────────────

    #[test]
    fn revision_history_is_ordered_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, at) in [("v1", 100u64), ("v2", 200), ("v3", 300)] {
            store
                .push_revision("prod/gateway", &sample_revision(id, at), 10)
                .unwrap();
        }

        let listed = store.list_revisions("prod/gateway", 10).unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["v3", "v2", "v1"]);

        let latest = store.latest_revision("prod/gateway").unwrap().unwrap();
        assert_eq!(latest.id, "v3");
    }

    #[test]
    fn revision_retention_rotates_oldest_out() {
        let store = StateStore::open_in_memory().unwrap();
        for i in 1..=5u64 {
            store
                .push_revision("prod/gateway", &sample_revision(&format!("v{i}"), i * 100), 3)
                .unwrap();
        }

        let listed = store.list_revisions("prod/gateway", 10).unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["v5", "v4", "v3"]);
    }

    #[test]
    fn revision_history_is_per_rollout() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .push_revision("prod/gateway", &sample_revision("g1", 100), 10)
            .unwrap();
        store
            .push_revision("prod/gateway-edge", &sample_revision("e1", 100), 10)
            .unwrap();

        let gateway = store.list_revisions("prod/gateway", 10).unwrap();
        assert_eq!(gateway.len(), 1);
        assert_eq!(gateway[0].id, "g1");
    }

    #[test]
    fn revision_seq_continues_after_rotation() {
        let store = StateStore::open_in_memory().unwrap();
        for i in 1..=4u64 {
            let seq = store
                .push_revision("prod/gateway", &sample_revision(&format!("v{i}"), i * 100), 2)
                .unwrap();
            assert_eq!(seq, i - 1);
        }
    }

    // ── Analysis log ───────────────────────────────────────────────

    #[test]
    fn analysis_log_appends_with_assigned_seq() {
        let store = StateStore::open_in_memory().unwrap();
        let seq0 = store
            .append_analysis_record(&sample_run("prod/gateway", Verdict::Inconclusive, 1000), 10)
            .unwrap();
        let seq1 = store
            .append_analysis_record(&sample_run("prod/gateway", Verdict::Successful, 2000), 10)
            .unwrap();
        assert_eq!((seq0, seq1), (0, 1));

        let listed = store.list_analysis_records("prod/gateway", 10).unwrap();
        assert_eq!(listed.len(), 2);
        // Newest first.
        assert_eq!(listed[0].seq, 1);
        assert_eq!(listed[0].verdict, Verdict::Successful);
        assert_eq!(listed[1].verdict, Verdict::Inconclusive);
    }

    #[test]
    fn analysis_log_rotates_at_cap() {
        let store = StateStore::open_in_memory().unwrap();
        for at in [1000u64, 2000, 3000] {
            store
                .append_analysis_record(&sample_run("prod/gateway", Verdict::Successful, at), 2)
                .unwrap();
        }

        let listed = store.list_analysis_records("prod/gateway", 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].started_at, 3000);
        assert_eq!(listed[1].started_at, 2000);
    }

    #[test]
    fn analysis_log_respects_list_limit() {
        let store = StateStore::open_in_memory().unwrap();
        for at in [1000u64, 2000, 3000] {
            store
                .append_analysis_record(&sample_run("prod/gateway", Verdict::Successful, at), 10)
                .unwrap();
        }

        let listed = store.list_analysis_records("prod/gateway", 2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].started_at, 3000);
    }

    // ── Metric samples ─────────────────────────────────────────────

    fn put_sample(store: &StateStore, revision: &str, metric: &str, at: u64, value: f64) {
        store
            .put_metric_sample(&MetricSample {
                revision: revision.to_string(),
                metric: metric.to_string(),
                at,
                value,
            })
            .unwrap();
    }

    #[test]
    fn metric_window_returns_latest_sample() {
        let store = StateStore::open_in_memory().unwrap();
        put_sample(&store, "v2", "error_rate", 100, 0.01);
        put_sample(&store, "v2", "error_rate", 200, 0.02);
        put_sample(&store, "v2", "error_rate", 300, 0.03);

        let hit = store
            .latest_metric_in_window("v2", "error_rate", 50, 250)
            .unwrap()
            .unwrap();
        assert_eq!(hit.at, 200);
        assert_eq!(hit.value, 0.02);
    }

    #[test]
    fn metric_window_with_no_data_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        put_sample(&store, "v2", "error_rate", 100, 0.01);

        assert!(store
            .latest_metric_in_window("v2", "error_rate", 400, 500)
            .unwrap()
            .is_none());
        assert!(store
            .latest_metric_in_window("v2", "latency_p95_ms", 50, 150)
            .unwrap()
            .is_none());
    }

    #[test]
    fn metric_window_is_revision_scoped() {
        let store = StateStore::open_in_memory().unwrap();
        put_sample(&store, "v1", "critical_vuln_count", 100, 0.0);

        assert!(store
            .latest_metric_in_window("v2", "critical_vuln_count", 50, 150)
            .unwrap()
            .is_none());
    }

    #[test]
    fn metric_window_bounds_are_inclusive() {
        let store = StateStore::open_in_memory().unwrap();
        put_sample(&store, "v2", "policy_violations", 100, 1.0);

        let hit = store
            .latest_metric_in_window("v2", "policy_violations", 100, 100)
            .unwrap();
        assert!(hit.is_some());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rollgate.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_rollout(&sample_record("prod", "gateway")).unwrap();
            store
                .push_revision("prod/gateway", &sample_revision("v1", 500), 10)
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let record = store.get_rollout("prod/gateway").unwrap();
        assert!(record.is_some());
        assert_eq!(record.unwrap().spec.name, "gateway");
        assert_eq!(
            store.latest_revision("prod/gateway").unwrap().unwrap().id,
            "v1"
        );
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_rollouts().unwrap().is_empty());
        assert!(store.list_revisions("any", 10).unwrap().is_empty());
        assert!(store.list_analysis_records("any", 10).unwrap().is_empty());
        assert!(store.latest_revision("any").unwrap().is_none());
        assert!(!store.delete_rollout("nope").unwrap());
    }
}
