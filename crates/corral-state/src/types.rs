//! Domain types for the corral state store.
//!
//! These types represent the persisted records the scheduler collaborates
//! with: workloads (VM instances), the compute-node inventory and quota
//! reservations. All types are serializable to/from JSON for storage in
//! redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a workload (instance uuid).
pub type WorkloadId = String;

/// Tenant / project identifier used for usage accounting.
pub type ProjectId = String;

/// Name of a worker host.
pub type HostName = String;

// ── Workload ──────────────────────────────────────────────────────

/// Externally visible lifecycle state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Building,
    Active,
    Resized,
    Stopped,
    Error,
}

impl VmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Building => "building",
            VmState::Active => "active",
            VmState::Resized => "resized",
            VmState::Stopped => "stopped",
            VmState::Error => "error",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-progress operation on a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduling,
    Spawning,
    ResizePrep,
    Migrating,
}

/// A recorded failure attached to a workload, queryable by operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadFault {
    /// HTTP-like fault code (500 for internal faults, 400-ish for domain errors).
    pub code: u16,
    pub message: String,
    /// The operation that produced the fault (e.g. "run_instance").
    pub method: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

/// Persisted record of a single workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadRecord {
    pub id: WorkloadId,
    pub project_id: ProjectId,
    /// Host the workload runs on (or was scheduled to).
    pub host: Option<HostName>,
    /// Hypervisor node within the host, if the host reports several.
    pub node: Option<String>,
    pub vm_state: VmState,
    pub task_state: Option<TaskState>,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
    /// Most recent fault, if any.
    pub fault: Option<WorkloadFault>,
    /// Unix timestamp when a scheduler last placed this workload.
    pub scheduled_at: Option<u64>,
    /// Unix timestamp of the last update.
    pub updated_at: u64,
}

/// A partial update applied by [`crate::StateStore::update_workload_and_get_original`].
///
/// `None` fields are left untouched. `Some(None)` clears an optional field
/// such as the task state or the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadUpdate {
    pub vm_state: Option<VmState>,
    pub task_state: Option<Option<TaskState>>,
    /// Reject the update unless the current task state equals this one.
    pub expected_task_state: Option<TaskState>,
    pub host: Option<Option<HostName>>,
    pub node: Option<Option<String>>,
    pub scheduled_at: Option<u64>,
    pub fault: Option<WorkloadFault>,
}

impl WorkloadUpdate {
    /// Set `vm_state` and clear the task state.
    pub fn settle(vm_state: VmState) -> Self {
        Self {
            vm_state: Some(vm_state),
            task_state: Some(None),
            ..Self::default()
        }
    }

    pub fn with_expected_task_state(mut self, expected: TaskState) -> Self {
        self.expected_task_state = Some(expected);
        self
    }

    pub fn with_fault(mut self, fault: WorkloadFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Also clear the host and node assignment.
    pub fn clearing_placement(mut self) -> Self {
        self.host = Some(None);
        self.node = Some(None);
        self
    }

    /// Apply the non-`None` fields to `record`.
    pub fn apply(&self, record: &mut WorkloadRecord, now: u64) {
        if let Some(vm_state) = self.vm_state {
            record.vm_state = vm_state;
        }
        if let Some(task_state) = self.task_state {
            record.task_state = task_state;
        }
        if let Some(host) = &self.host {
            record.host = host.clone();
        }
        if let Some(node) = &self.node {
            record.node = node.clone();
        }
        if let Some(at) = self.scheduled_at {
            record.scheduled_at = Some(at);
        }
        if let Some(fault) = &self.fault {
            record.fault = Some(fault.clone());
        }
        record.updated_at = now;
    }
}

// ── Compute inventory ─────────────────────────────────────────────

/// Physical resources and usage of one compute host, as recorded by the
/// inventory (independent of the scheduler's capability reports).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeNodeRecord {
    pub host: HostName,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub local_gb: u64,
    pub vcpus_used: u32,
    pub memory_mb_used: u64,
    pub local_gb_used: u64,
    pub hypervisor_type: String,
    pub hypervisor_version: u64,
    pub updated_at: u64,
}

// ── Quota ─────────────────────────────────────────────────────────

/// A quota reservation held while an operation is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub project_id: ProjectId,
    /// Resource name: "instances", "cores", "ram".
    pub resource: String,
    pub delta: i64,
    /// Unix timestamp after which the reservation is void.
    pub expires_at: u64,
}
