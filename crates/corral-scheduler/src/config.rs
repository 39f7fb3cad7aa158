//! Scheduler configuration (`corral.toml`).

use std::path::Path;

use corral_placement::PlacementConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub placement: PlacementConfig,
    /// Attempts allowed per run request before it fails outright.
    pub max_attempts: u32,
    /// Whether a resize may land on the host the workload already runs on.
    pub allow_resize_to_same_host: bool,
    /// How often the daemon purges expired quota reservations.
    pub reservation_expire_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            placement: PlacementConfig::default(),
            max_attempts: 3,
            allow_resize_to_same_host: false,
            reservation_expire_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
