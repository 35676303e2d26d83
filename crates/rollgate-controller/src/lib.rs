//! rollgate-controller — the reconciliation layer.
//!
//! A [`RolloutController`] wraps the passive state machine with
//! persistence and scheduling: it validates and stores submitted
//! rollouts, sweeps active ones through bounded concurrent reconciles,
//! serializes work per rollout with an identity lock, and applies
//! operator promote/abort commands. All time comes from a [`Clock`], so
//! the whole layer runs against a manual clock in tests.

pub mod clock;
pub mod config;
pub mod controller;
pub mod counters;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ControllerConfig;
pub use controller::RolloutController;
pub use counters::ControllerCounters;
pub use error::{ControllerError, ControllerResult};
