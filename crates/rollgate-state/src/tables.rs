//! redb table definitions for the rollgate state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Sequence and epoch key segments are zero-padded so lexicographic
//! order matches numeric order.

use redb::TableDefinition;

/// Rollout records (spec + status) keyed by `{namespace}/{name}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Stable-revision history keyed by `{rollout_id}:{seq:08}`.
pub const REVISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("revision_history");

/// Completed analysis-run records keyed by `{rollout_id}:{seq:08}`.
pub const ANALYSIS_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("analysis_log");

/// Ingested metric samples keyed by `{revision}:{metric}:{epoch:012}`.
pub const METRIC_SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("metric_samples");
