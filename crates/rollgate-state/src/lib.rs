//! rollgate-state — embedded state store for rollgate.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for rollout records, stable-revision history, analysis-run logs,
//! and ingested metric samples.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{rollout_id}:{seq}`) enable
//! prefix scans for per-rollout records. Sequence segments are zero-padded
//! so lexicographic key order matches insertion order, which is what the
//! capped-log rotation relies on.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Each rollout's status record is
//! mutated only by the controller task holding that rollout's lock; the
//! store itself only guarantees per-transaction atomicity.

pub mod error;
pub mod history;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use history::{HistoryStore, RevisionHistory};
pub use store::StateStore;
pub use types::*;
