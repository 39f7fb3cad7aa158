//! Name → filter/weigher resolution.
//!
//! The set of filters and weighers is closed; configuration only chooses
//! which ones run and in what order.

use crate::config::{PlacementConfig, WeigherEntry};
use crate::error::{PlacementError, PlacementResult};
use crate::filter::{FilterPipeline, HostFilter};
use crate::filters::{
    AvailabilityZoneFilter, ComputeFilter, CoreFilter, DifferentHostFilter, DiskFilter,
    GroupAntiAffinityFilter, IgnoreHostsFilter, ImagePropertiesFilter,
    MigrationCompatibilityFilter, RamFilter, RetryFilter, SameHostFilter,
    SimpleCidrAffinityFilter,
};
use crate::weigher::{
    CpuWeigher, DiskWeigher, HostWeigher, InstanceCountWeigher, RamWeigher, WeigherPipeline,
};

pub const FILTER_NAMES: &[&str] = &[
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
    "MigrationCompatibilityFilter",
];

pub const WEIGHER_NAMES: &[&str] = &[
    "RamWeigher",
    "CpuWeigher",
    "DiskWeigher",
    "InstanceCountWeigher",
];

/// Construct one filter by name, configured from `config`.
pub fn build_filter(name: &str, config: &PlacementConfig) -> PlacementResult<Box<dyn HostFilter>> {
    let filter: Box<dyn HostFilter> = match name {
        "RetryFilter" => Box::new(RetryFilter),
        "AvailabilityZoneFilter" => Box::new(AvailabilityZoneFilter),
        "ComputeFilter" => Box::new(ComputeFilter {
            freshness_secs: config.host_freshness_secs,
        }),
        "CoreFilter" => Box::new(CoreFilter {
            allocation_ratio: config.cpu_allocation_ratio,
        }),
        "RamFilter" => Box::new(RamFilter {
            allocation_ratio: config.ram_allocation_ratio,
            reserved_mb: config.reserved_host_memory_mb,
        }),
        "DiskFilter" => Box::new(DiskFilter {
            allocation_ratio: config.disk_allocation_ratio,
            reserved_gb: config.reserved_host_disk_gb,
        }),
        "ImagePropertiesFilter" => Box::new(ImagePropertiesFilter),
        "DifferentHostFilter" => Box::new(DifferentHostFilter),
        "SameHostFilter" => Box::new(SameHostFilter),
        "SimpleCidrAffinityFilter" => Box::new(SimpleCidrAffinityFilter),
        "GroupAntiAffinityFilter" => Box::new(GroupAntiAffinityFilter),
        "IgnoreHostsFilter" => Box::new(IgnoreHostsFilter),
        "MigrationCompatibilityFilter" => Box::new(MigrationCompatibilityFilter),
        other => return Err(PlacementError::UnknownFilter(other.to_string())),
    };
    Ok(filter)
}

/// Build a pipeline from an ordered list of filter names.
pub fn build_filters(names: &[String], config: &PlacementConfig) -> PlacementResult<FilterPipeline> {
    let filters = names
        .iter()
        .map(|name| build_filter(name, config))
        .collect::<PlacementResult<Vec<_>>>()?;
    Ok(FilterPipeline::new(filters))
}

pub fn build_weigher(name: &str) -> PlacementResult<Box<dyn HostWeigher>> {
    match name {
        "RamWeigher" => Ok(Box::new(RamWeigher)),
        "CpuWeigher" => Ok(Box::new(CpuWeigher)),
        "DiskWeigher" => Ok(Box::new(DiskWeigher)),
        "InstanceCountWeigher" => Ok(Box::new(InstanceCountWeigher)),
        other => Err(PlacementError::UnknownWeigher(other.to_string())),
    }
}

pub fn build_weighers(entries: &[WeigherEntry]) -> PlacementResult<WeigherPipeline> {
    let mut pipeline = WeigherPipeline::new();
    for entry in entries {
        pipeline.push(build_weigher(&entry.name)?, entry.multiplier);
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_name_builds() {
        let config = PlacementConfig::default();
        for name in FILTER_NAMES {
            let filter = build_filter(name, &config).unwrap();
            assert_eq!(filter.name(), *name);
        }
        for name in WEIGHER_NAMES {
            assert_eq!(build_weigher(name).unwrap().name(), *name);
        }
    }

    #[test]
    fn default_config_resolves() {
        let config = PlacementConfig::default();
        let filters = build_filters(&config.filters, &config).unwrap();
        assert_eq!(filters.len(), config.filters.len());
        assert_eq!(filters.names()[0], "RetryFilter");
        assert!(build_filters(&config.migration_filters, &config).is_ok());
        assert_eq!(build_weighers(&config.weighers).unwrap().names(), vec!["RamWeigher"]);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let config = PlacementConfig::default();
        let err = build_filters(&["NoSuchFilter".to_string()], &config)
            .err()
            .unwrap();
        assert_eq!(err, PlacementError::UnknownFilter("NoSuchFilter".to_string()));

        let err = build_weighers(&[WeigherEntry::new("Nope", 1.0)]).err().unwrap();
        assert_eq!(err, PlacementError::UnknownWeigher("Nope".to_string()));
    }

    #[test]
    fn order_is_preserved() {
        let config = PlacementConfig::default();
        let names = vec!["RamFilter".to_string(), "ComputeFilter".to_string()];
        let pipeline = build_filters(&names, &config).unwrap();
        assert_eq!(pipeline.names(), vec!["RamFilter", "ComputeFilter"]);
    }
}
