//! rollgate-traffic — traffic-split management for canary rollouts.
//!
//! Defines the [`TrafficManager`] trait the rollout state machine drives,
//! plus a local in-process implementation. A manager owns the mapping from
//! rollout identity to a stable/canary weight split; applying a split may
//! fail transiently and the observed split may lag the requested one, so
//! callers confirm via [`TrafficManager::get_weights`] before advancing.

pub mod error;
pub mod local;
pub mod manager;

pub use error::{TrafficError, TrafficResult};
pub use local::LocalTrafficManager;
pub use manager::{TrafficManager, WeightSplit};
