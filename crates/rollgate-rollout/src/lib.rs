//! rollgate-rollout — the canary rollout state machine.
//!
//! A rollout walks an ordered step sequence (shift weight, pause, run
//! analysis) from all-stable to all-canary traffic. The machine here is
//! deliberately passive: it holds no timers and spawns no tasks. Every
//! wait — traffic propagation, a pause deadline, the next analysis
//! sample — is expressed as a deadline stored in the persisted
//! [`rollgate_state::RolloutStatus`], and the controller simply calls
//! [`machine::RolloutMachine::tick`] with the current time until the
//! rollout reaches a terminal phase. That makes every rollout resumable
//! from the store after a crash, and makes the whole machine testable
//! with a plain time counter.
//!
//! Phase flow: `Initializing → {Progressing | Paused | Analyzing}* →
//! Promoting → Stable`, with `Aborting → RolledBack` reachable from any
//! non-terminal phase.

pub mod error;
pub mod machine;
pub mod step;

pub use error::{RolloutError, RolloutResult};
pub use machine::{MachineConfig, RolloutMachine};
pub use step::validate_spec;
