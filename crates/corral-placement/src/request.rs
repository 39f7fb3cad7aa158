//! Placement requests and the per-evaluation context handed to filters
//! and weighers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::host_state::{HostState, Resources};

/// Raw scheduler hints as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerHints {
    /// Place away from the hosts running these workloads.
    pub different_host: Vec<String>,
    /// Place on a host running one of these workloads.
    pub same_host: Vec<String>,
    /// Place on a host whose IP is in the same network as this address.
    pub build_near_host_ip: Option<String>,
    /// Prefix length for `build_near_host_ip`, written as `/NN`.
    pub cidr: Option<String>,
}

/// Anti-affinity group: no two members may share a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntiAffinityGroup {
    pub name: String,
    /// Hosts already running members of the group.
    #[serde(default)]
    pub hosts: BTreeSet<String>,
}

/// Scheduling attempts made so far for a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub num_attempts: u32,
    /// Hosts tried by earlier attempts.
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Hard constraints evaluated by the filter pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterProperties {
    pub availability_zone: Option<String>,
    pub group: Option<AntiAffinityGroup>,
    /// Image properties the host must advertise with equal values.
    pub image_properties: BTreeMap<String, String>,
    pub hints: SchedulerHints,
    /// Hosts resolved from `hints.different_host`.
    pub different_hosts: BTreeSet<String>,
    /// Hosts resolved from `hints.same_host`; `None` when the hint is absent.
    pub same_hosts: Option<BTreeSet<String>>,
    pub retry: Option<RetryInfo>,
    /// Hosts excluded outright.
    pub ignore_hosts: BTreeSet<String>,
}

/// One unit of scheduling work: N identical workloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Workloads to place, in placement order.
    #[serde(default)]
    pub workload_ids: Vec<String>,
    /// Resources required by each workload.
    pub resources: Resources,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub constraints: FilterProperties,
}

impl PlacementRequest {
    pub fn new(workload_ids: Vec<String>, resources: Resources) -> Self {
        Self {
            workload_ids,
            resources,
            ..Self::default()
        }
    }

    /// Number of hosts to select. A request without ids still selects one.
    pub fn instance_count(&self) -> usize {
        self.workload_ids.len().max(1)
    }
}

/// Live-migration placement for one existing workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub workload_id: String,
    /// Host the workload currently runs on.
    pub source_host: String,
    /// Explicit destination; `None` lets the scheduler choose.
    pub destination: Option<String>,
    pub block_migration: bool,
    pub disk_over_commit: bool,
    pub resources: Resources,
}

/// Migration-specific inputs for filters.
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext<'a> {
    pub source: &'a HostState,
    pub block_migration: bool,
    pub disk_over_commit: bool,
}

/// Everything a filter or weigher may look at besides the host itself.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub resources: &'a Resources,
    pub properties: &'a FilterProperties,
    /// Evaluation time (Unix seconds), fixed for one request.
    pub now: u64,
    pub migration: Option<MigrationContext<'a>>,
}

impl<'a> PlacementContext<'a> {
    pub fn new(resources: &'a Resources, properties: &'a FilterProperties, now: u64) -> Self {
        Self {
            resources,
            properties,
            now,
            migration: None,
        }
    }
}
