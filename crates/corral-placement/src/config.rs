//! Placement configuration.
//!
//! Filters and weighers are selected by name from a fixed registry, in the
//! order given here. Every field has a default so a partial `[placement]`
//! table is enough.

use serde::{Deserialize, Serialize};

/// A weigher and the multiplier applied to its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeigherEntry {
    pub name: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl WeigherEntry {
    pub fn new(name: &str, multiplier: f64) -> Self {
        Self {
            name: name.to_string(),
            multiplier,
        }
    }
}

fn default_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Filters for run/resize placement, applied in order.
    pub filters: Vec<String>,
    /// Filters for live-migration destinations, applied in order.
    pub migration_filters: Vec<String>,
    pub weighers: Vec<WeigherEntry>,
    /// Reports older than this are treated as stale.
    pub host_freshness_secs: u64,
    pub cpu_allocation_ratio: f64,
    pub ram_allocation_ratio: f64,
    pub disk_allocation_ratio: f64,
    pub reserved_host_memory_mb: u64,
    pub reserved_host_disk_gb: u64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            filters: [
                "RetryFilter",
                "AvailabilityZoneFilter",
                "ComputeFilter",
                "CoreFilter",
                "RamFilter",
                "DiskFilter",
                "ImagePropertiesFilter",
                "DifferentHostFilter",
                "SameHostFilter",
                "SimpleCidrAffinityFilter",
                "GroupAntiAffinityFilter",
                "IgnoreHostsFilter",
            ]
            .map(String::from)
            .to_vec(),
            migration_filters: [
                "ComputeFilter",
                "CoreFilter",
                "RamFilter",
                "DiskFilter",
                "MigrationCompatibilityFilter",
            ]
            .map(String::from)
            .to_vec(),
            weighers: vec![WeigherEntry::new("RamWeigher", 1.0)],
            host_freshness_secs: 60,
            cpu_allocation_ratio: 16.0,
            ram_allocation_ratio: 1.5,
            disk_allocation_ratio: 1.0,
            reserved_host_memory_mb: 512,
            reserved_host_disk_gb: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let config: PlacementConfig = serde_json::from_value(serde_json::json!({
            "host_freshness_secs": 30,
            "weighers": [{"name": "CpuWeigher"}, {"name": "RamWeigher", "multiplier": -2.0}],
        }))
        .unwrap();

        assert_eq!(config.host_freshness_secs, 30);
        assert_eq!(config.weighers[0].multiplier, 1.0);
        assert_eq!(config.weighers[1].multiplier, -2.0);
        assert_eq!(config.filters, PlacementConfig::default().filters);
        assert_eq!(config.ram_allocation_ratio, 1.5);
    }
}
