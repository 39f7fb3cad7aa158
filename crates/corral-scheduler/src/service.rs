//! Scheduler service: the request-handling façade.
//!
//! Every placement goes through the [`PlacementEngine`]. When an attempt
//! fails, the affected workloads are compensated exactly once before the
//! outcome is returned: `NoValidHost` becomes [`ScheduleOutcome::Failed`],
//! anything else is returned as an error after compensation.

use std::collections::{BTreeMap, BTreeSet};

use corral_placement::{
    CapabilityPayload, FilterProperties, HostState, MigrationRequest, PlacementEngine,
    PlacementError, PlacementRequest, Resources, RetryInfo,
};
use corral_state::{TaskState, VmState, WorkloadFault, WorkloadUpdate, epoch_secs};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::collaborators::{Collaborators, Notification, Priority};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};

/// One workload and the host chosen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub workload_id: String,
    pub host: String,
}

/// Caller-visible result of a run or resize attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled {
        placements: Vec<Placement>,
        /// Attempt count and tried hosts, to send back with a reschedule.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry: Option<RetryInfo>,
    },
    /// No host could take the request; workloads were compensated.
    Failed { reason: String },
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled { .. })
    }
}

/// Resize of an existing workload to a new flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub workload_id: String,
    pub resources: Resources,
    #[serde(default)]
    pub constraints: FilterProperties,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub vcpus: u64,
    pub memory_mb: u64,
    pub local_gb: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUsage {
    pub vcpus: u64,
    pub memory_mb: u64,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
}

/// Inventory view of one host: capacity, usage and per-project consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResources {
    pub host: String,
    pub total: ResourceTotals,
    pub used_now: ResourceTotals,
    pub usage: BTreeMap<String, ProjectUsage>,
}

/// How a failed attempt is compensated.
struct Compensation<'a> {
    method: &'a str,
    workload_ids: &'a [String],
    update: WorkloadUpdate,
    request_spec: Value,
    reservations: &'a [String],
}

pub struct SchedulerService {
    engine: PlacementEngine,
    collaborators: Collaborators,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(engine: PlacementEngine, collaborators: Collaborators, config: SchedulerConfig) -> Self {
        Self {
            engine,
            collaborators,
            config,
        }
    }

    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Fold a capability report from a worker host.
    pub fn update_service_capabilities(
        &self,
        service_name: &str,
        host: &str,
        capabilities: CapabilityPayload,
    ) -> usize {
        self.engine.store().update(service_name, host, capabilities)
    }

    /// Place the workloads of `request`, recording the chosen hosts.
    pub fn run_instance(
        &self,
        mut request: PlacementRequest,
        reservations: &[String],
    ) -> SchedulerResult<ScheduleOutcome> {
        let result = self.try_run_instance(&mut request);
        match result {
            Ok(placements) => Ok(ScheduleOutcome::Scheduled {
                placements,
                retry: request.constraints.retry,
            }),
            Err(err) => self.handle_failure(
                err,
                Compensation {
                    method: "run_instance",
                    workload_ids: &request.workload_ids,
                    update: WorkloadUpdate::settle(VmState::Error).clearing_placement(),
                    request_spec: to_spec(&request),
                    reservations,
                },
            ),
        }
    }

    fn try_run_instance(&self, request: &mut PlacementRequest) -> SchedulerResult<Vec<Placement>> {
        self.count_attempt(request)?;
        self.resolve_hints(&mut request.constraints)?;

        let hosts = self.engine.select_hosts(request)?;
        record_tried_hosts(&mut request.constraints.retry, &hosts);
        let now = epoch_secs();
        let mut placements = Vec::with_capacity(hosts.len());
        for (workload_id, host) in request.workload_ids.iter().zip(&hosts) {
            let update = WorkloadUpdate {
                host: Some(Some(host.host().to_string())),
                scheduled_at: Some(now),
                ..WorkloadUpdate::default()
            };
            self.collaborators.db.update_and_get_original(workload_id, &update)?;
            placements.push(Placement {
                workload_id: workload_id.clone(),
                host: host.host().to_string(),
            });
        }
        info!(
            count = hosts.len(),
            project = %request.project_id,
            "workloads scheduled"
        );
        Ok(placements)
    }

    /// Pick the host a workload should be resized onto.
    ///
    /// A failure to find a host reverts the workload to `Active` so it stays
    /// usable on its current host.
    pub fn prep_resize(
        &self,
        request: ResizeRequest,
        reservations: &[String],
    ) -> SchedulerResult<ScheduleOutcome> {
        let workload_ids = std::slice::from_ref(&request.workload_id);
        match self.try_prep_resize(&request) {
            Ok((placement, retry)) => Ok(ScheduleOutcome::Scheduled {
                placements: vec![placement],
                retry,
            }),
            Err(err) => {
                let update = if err.is_no_valid_host() {
                    WorkloadUpdate::settle(VmState::Active)
                } else {
                    WorkloadUpdate::settle(VmState::Error)
                };
                self.handle_failure(
                    err,
                    Compensation {
                        method: "prep_resize",
                        workload_ids,
                        update,
                        request_spec: to_spec(&request),
                        reservations,
                    },
                )
            }
        }
    }

    fn try_prep_resize(
        &self,
        request: &ResizeRequest,
    ) -> SchedulerResult<(Placement, Option<RetryInfo>)> {
        let workload = self
            .collaborators
            .db
            .get_workload(&request.workload_id)?
            .ok_or_else(|| SchedulerError::WorkloadNotFound(request.workload_id.clone()))?;

        let mut constraints = request.constraints.clone();
        if !self.config.allow_resize_to_same_host {
            if let Some(current) = &workload.host {
                constraints.ignore_hosts.insert(current.clone());
            }
        }
        self.resolve_hints(&mut constraints)?;

        let mut placement_request = PlacementRequest {
            workload_ids: vec![request.workload_id.clone()],
            resources: request.resources,
            project_id: workload.project_id.clone(),
            constraints,
        };
        self.count_attempt(&mut placement_request)?;
        let hosts = self.engine.select_hosts(&placement_request)?;
        let host = hosts
            .first()
            .ok_or_else(|| PlacementError::Internal("empty selection".to_string()))?;
        record_tried_hosts(&mut placement_request.constraints.retry, &hosts);
        info!(workload = %request.workload_id, host = host.host(), "resize destination chosen");
        let placement = Placement {
            workload_id: request.workload_id.clone(),
            host: host.host().to_string(),
        };
        Ok((placement, placement_request.constraints.retry))
    }

    /// Choose or validate a live-migration destination.
    ///
    /// Every failure, including `NoValidHost`, clears the migrating task
    /// state and is returned to the caller.
    pub fn live_migration(&self, request: &MigrationRequest) -> SchedulerResult<HostState> {
        match self.engine.select_destination(request) {
            Ok(destination) => Ok(destination),
            Err(err) => {
                let err = SchedulerError::from(err);
                // Keep the current vm_state so the error notification carries it.
                let vm_state = match self.collaborators.db.get_workload(&request.workload_id) {
                    Ok(workload) => workload.map(|w| w.vm_state),
                    Err(e) => {
                        warn!(workload = %request.workload_id, error = %e, "failed to read workload state");
                        None
                    }
                };
                let update = WorkloadUpdate {
                    vm_state,
                    task_state: Some(None),
                    ..WorkloadUpdate::default()
                }
                .with_expected_task_state(TaskState::Migrating);
                warn!(workload = %request.workload_id, error = %err, "live migration not scheduled");
                self.compensate(
                    &err,
                    Compensation {
                        method: "live_migration",
                        workload_ids: std::slice::from_ref(&request.workload_id),
                        update,
                        request_spec: to_spec(request),
                        reservations: &[],
                    },
                );
                Err(err)
            }
        }
    }

    /// Host names the engine would choose, without touching any workload.
    pub fn select_hosts(&self, request: &PlacementRequest) -> SchedulerResult<Vec<String>> {
        let mut request = request.clone();
        self.resolve_hints(&mut request.constraints)?;
        let hosts = self.engine.select_hosts(&request)?;
        Ok(hosts.iter().map(|h| h.host().to_string()).collect())
    }

    /// Capacity and per-project usage of `host`, from the inventory.
    pub fn show_host_resources(&self, host: &str) -> SchedulerResult<HostResources> {
        let node = self
            .collaborators
            .db
            .compute_node(host)?
            .ok_or_else(|| SchedulerError::HostNotFound(host.to_string()))?;

        let mut usage: BTreeMap<String, ProjectUsage> = BTreeMap::new();
        for workload in self.collaborators.db.workloads_on_host(host)? {
            let entry = usage.entry(workload.project_id).or_default();
            entry.vcpus += u64::from(workload.vcpus);
            entry.memory_mb += workload.memory_mb;
            entry.root_gb += workload.root_gb;
            entry.ephemeral_gb += workload.ephemeral_gb;
        }

        Ok(HostResources {
            host: node.host,
            total: ResourceTotals {
                vcpus: u64::from(node.vcpus),
                memory_mb: node.memory_mb,
                local_gb: node.local_gb,
            },
            used_now: ResourceTotals {
                vcpus: u64::from(node.vcpus_used),
                memory_mb: node.memory_mb_used,
                local_gb: node.local_gb_used,
            },
            usage,
        })
    }

    /// Purge quota reservations that have expired.
    pub fn expire_reservations(&self) -> SchedulerResult<u32> {
        let removed = self.collaborators.quota.expire(epoch_secs())?;
        if removed > 0 {
            info!(removed, "expired reservations purged");
        }
        Ok(removed)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn count_attempt(&self, request: &mut PlacementRequest) -> SchedulerResult<()> {
        let Some(retry) = request.constraints.retry.as_mut() else {
            return Ok(());
        };
        retry.num_attempts += 1;
        if retry.num_attempts > self.config.max_attempts {
            let first = request.workload_ids.first().map(String::as_str).unwrap_or("-");
            return Err(PlacementError::no_valid_host(format!(
                "exceeded max scheduling attempts {} for workload {first}",
                self.config.max_attempts
            ))
            .into());
        }
        debug!(attempt = retry.num_attempts, tried = ?retry.hosts, "scheduling attempt");
        Ok(())
    }

    /// Turn workload-id hints into host sets for the filters.
    fn resolve_hints(&self, properties: &mut FilterProperties) -> SchedulerResult<()> {
        if !properties.hints.different_host.is_empty() {
            let hosts = self.hosts_of(&properties.hints.different_host)?;
            properties.different_hosts.extend(hosts);
        }
        if !properties.hints.same_host.is_empty() {
            let hosts = self.hosts_of(&properties.hints.same_host)?;
            properties.same_hosts = Some(hosts);
        }
        Ok(())
    }

    /// Hosts of the named workloads. Unknown workloads contribute no host.
    fn hosts_of(&self, workload_ids: &[String]) -> SchedulerResult<BTreeSet<String>> {
        let mut hosts = BTreeSet::new();
        for id in workload_ids {
            match self.collaborators.db.get_workload(id)? {
                Some(workload) => hosts.extend(workload.host),
                None => debug!(workload = %id, "hint names an unknown workload"),
            }
        }
        Ok(hosts)
    }

    /// Compensate, then swallow `NoValidHost` and return anything else.
    fn handle_failure(
        &self,
        err: SchedulerError,
        compensation: Compensation<'_>,
    ) -> SchedulerResult<ScheduleOutcome> {
        if err.is_no_valid_host() {
            warn!(method = compensation.method, error = %err, "failed to schedule");
            self.compensate(&err, compensation);
            Ok(ScheduleOutcome::Failed {
                reason: err.to_string(),
            })
        } else {
            error!(method = compensation.method, error = %err, "scheduling fault");
            self.compensate(&err, compensation);
            Err(err)
        }
    }

    fn compensate(&self, err: &SchedulerError, compensation: Compensation<'_>) {
        self.set_vm_state_and_notify(err, &compensation);
        if compensation.reservations.is_empty() {
            return;
        }
        if let Err(e) = self.collaborators.quota.rollback(compensation.reservations) {
            error!(method = compensation.method, error = %e, "quota rollback failed");
        }
    }

    /// Apply the failure state to each workload and publish the outcome.
    ///
    /// The fault is written by the same update as the state change.
    fn set_vm_state_and_notify(&self, err: &SchedulerError, compensation: &Compensation<'_>) {
        let method = compensation.method;
        let reason = err.to_string();
        let event_type = format!("scheduler.{method}");
        let fault = WorkloadFault {
            code: err.fault_code(),
            message: reason.clone(),
            method: method.to_string(),
            created_at: epoch_secs(),
        };

        if compensation.workload_ids.is_empty() {
            self.publish(&event_type, Priority::Error, json!({
                "request_spec": compensation.request_spec,
                "workload_id": Value::Null,
                "state": compensation.update.vm_state,
                "method": method,
                "reason": reason,
            }));
            return;
        }

        for workload_id in compensation.workload_ids {
            let update = compensation.update.clone().with_fault(fault.clone());
            match self.collaborators.db.update_and_get_original(workload_id, &update) {
                Ok((old, new)) => self.publish(
                    "compute.instance.update",
                    Priority::Info,
                    json!({
                        "workload_id": workload_id,
                        "old_state": old.vm_state,
                        "state": new.vm_state,
                        "old_task_state": old.task_state,
                        "new_task_state": new.task_state,
                    }),
                ),
                Err(e) => {
                    error!(workload = %workload_id, method, error = %e, "failed to record failure state")
                }
            }

            self.publish(&event_type, Priority::Error, json!({
                "request_spec": compensation.request_spec,
                "workload_id": workload_id,
                "state": compensation.update.vm_state,
                "method": method,
                "reason": reason,
            }));
        }
    }

    fn publish(&self, event_type: &str, priority: Priority, payload: Value) {
        self.collaborators.notifier.notify(Notification {
            event_type: event_type.to_string(),
            priority,
            payload,
        });
    }
}

/// Add the chosen hosts to the retry record, once each.
fn record_tried_hosts(retry: &mut Option<RetryInfo>, hosts: &[HostState]) {
    let Some(retry) = retry.as_mut() else {
        return;
    };
    for host in hosts {
        if !retry.hosts.iter().any(|h| h == host.host()) {
            retry.hosts.push(host.host().to_string());
        }
    }
}

fn to_spec<T: Serialize>(request: &T) -> Value {
    serde_json::to_value(request).unwrap_or(Value::Null)
}
