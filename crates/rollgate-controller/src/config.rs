//! Controller configuration, loadable from TOML.
//!
//! Every field has a default, so a missing or partial file still yields
//! a working controller. The daemon layers CLI flags on top.

use std::path::Path;

use serde::{Deserialize, Serialize};

use rollgate_analysis::EngineConfig;
use rollgate_rollout::MachineConfig;

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_max_concurrent_reconciles() -> usize {
    8
}

fn default_history_retention() -> usize {
    10
}

fn default_analysis_log_cap() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Seconds between reconcile sweeps.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Rollouts reconciled concurrently within one sweep.
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    /// Past stable revisions kept per rollout.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    /// Completed analysis runs kept per rollout.
    #[serde(default = "default_analysis_log_cap")]
    pub analysis_log_cap: usize,
    /// State machine tuning (traffic retries, inconclusive budget).
    #[serde(default)]
    pub machine: MachineConfig,
    /// Analysis engine tuning (sample cadence, query window).
    #[serde(default)]
    pub analysis: EngineConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            history_retention: default_history_retention(),
            analysis_log_cap: default_analysis_log_cap(),
            machine: MachineConfig::default(),
            analysis: EngineConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
