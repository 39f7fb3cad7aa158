//! Scenario files: a fleet, its inventory, and a list of scheduler calls.

use std::path::Path;

use corral_placement::{CapabilityPayload, MigrationRequest, PlacementRequest};
use corral_scheduler::ResizeRequest;
use corral_state::{ComputeNodeRecord, Reservation, WorkloadRecord};
use serde::{Deserialize, Serialize};

fn default_service() -> String {
    corral_placement::COMPUTE_SERVICE.to_string()
}

/// One capability report pushed by a worker host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    #[serde(default = "default_service")]
    pub service: String,
    pub capabilities: CapabilityPayload,
}

/// A scheduler call, executed in file order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    RunInstance {
        request: PlacementRequest,
        #[serde(default)]
        reservations: Vec<String>,
    },
    PrepResize {
        request: ResizeRequest,
        #[serde(default)]
        reservations: Vec<String>,
    },
    LiveMigration {
        request: MigrationRequest,
    },
    SelectHosts {
        request: PlacementRequest,
    },
    ShowHostResources {
        host: String,
    },
    ExpireReservations,
    /// Capability reports arriving between calls.
    Report {
        reports: Vec<HostReport>,
    },
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::RunInstance { .. } => "run_instance",
            Step::PrepResize { .. } => "prep_resize",
            Step::LiveMigration { .. } => "live_migration",
            Step::SelectHosts { .. } => "select_hosts",
            Step::ShowHostResources { .. } => "show_host_resources",
            Step::ExpireReservations => "expire_reservations",
            Step::Report { .. } => "report",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Initial capability reports, ingested concurrently.
    pub reports: Vec<HostReport>,
    pub compute_nodes: Vec<ComputeNodeRecord>,
    pub workloads: Vec<WorkloadRecord>,
    pub reservations: Vec<Reservation>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&content)?;
        Ok(scenario)
    }
}
