//! Scenario runner.
//!
//! Capability reports are ingested on tokio tasks, one per report. Each
//! scheduler call runs on a blocking worker since placement is synchronous
//! CPU work. A reservation-expiry loop runs alongside until the scenario
//! finishes.

use std::sync::Arc;
use std::time::Duration;

use corral_scheduler::{Notification, Notifier, RecordingNotifier, SchedulerService};
use corral_state::{StateStore, WorkloadRecord};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::scenario::{HostReport, Scenario, Step};

/// Logs every notification and keeps a copy for the report.
pub struct DaemonNotifier {
    log: corral_scheduler::LogNotifier,
    recorded: Arc<RecordingNotifier>,
}

impl DaemonNotifier {
    pub fn new(recorded: Arc<RecordingNotifier>) -> Self {
        Self {
            log: corral_scheduler::LogNotifier,
            recorded,
        }
    }
}

impl Notifier for DaemonNotifier {
    fn notify(&self, notification: Notification) {
        self.log.notify(notification.clone());
        self.recorded.notify(notification);
    }
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub notifications: Vec<Notification>,
    pub workloads: Vec<WorkloadRecord>,
}

/// Load the scenario's inventory into the store.
pub fn seed(store: &StateStore, scenario: &Scenario) -> anyhow::Result<()> {
    for node in &scenario.compute_nodes {
        store.put_compute_node(node)?;
    }
    for workload in &scenario.workloads {
        store.put_workload(workload)?;
    }
    for reservation in &scenario.reservations {
        store.put_reservation(reservation)?;
    }
    info!(
        compute_nodes = scenario.compute_nodes.len(),
        workloads = scenario.workloads.len(),
        reservations = scenario.reservations.len(),
        "inventory seeded"
    );
    Ok(())
}

/// Fold reports concurrently, one task per report.
pub async fn ingest(service: &Arc<SchedulerService>, reports: Vec<HostReport>) -> anyhow::Result<usize> {
    let mut tasks = JoinSet::new();
    for report in reports {
        let service = service.clone();
        tasks.spawn(async move {
            service.update_service_capabilities(&report.service, &report.host, report.capabilities)
        });
    }
    let mut facts = 0;
    while let Some(folded) = tasks.join_next().await {
        facts += folded?;
    }
    debug!(facts, "capability reports ingested");
    Ok(facts)
}

/// Periodically purge expired reservations until `shutdown` flips.
pub async fn expiry_loop(
    service: Arc<SchedulerService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "reservation expiry started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let service = service.clone();
                match tokio::task::spawn_blocking(move || service.expire_reservations()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "reservation expiry failed"),
                    Err(e) => warn!(error = %e, "reservation expiry task panicked"),
                }
            }
            _ = shutdown.changed() => {
                info!("reservation expiry shutting down");
                break;
            }
        }
    }
}

/// Run every step in order and collect the outcome of each.
pub async fn run_scenario(
    service: Arc<SchedulerService>,
    store: StateStore,
    notifications: Arc<RecordingNotifier>,
    scenario: Scenario,
) -> anyhow::Result<RunReport> {
    seed(&store, &scenario)?;
    ingest(&service, scenario.reports).await?;

    let interval = Duration::from_secs(service.config().reservation_expire_interval_secs.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let expiry = tokio::spawn(expiry_loop(service.clone(), interval, shutdown_rx));

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.into_iter().enumerate() {
        let op = step.op();
        let outcome = match step {
            Step::Report { reports } => ingest(&service, reports)
                .await
                .map(|facts| json!({ "facts": facts })),
            step => {
                let service = service.clone();
                tokio::task::spawn_blocking(move || execute(&service, step)).await?
            }
        };
        let report = match outcome {
            Ok(result) => StepReport {
                index,
                op,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                warn!(index, op, error = %e, "step failed");
                StepReport {
                    index,
                    op,
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        };
        steps.push(report);
    }

    let _ = shutdown_tx.send(true);
    let _ = expiry.await;

    Ok(RunReport {
        steps,
        notifications: notifications.events(),
        workloads: store.list_workloads()?,
    })
}

fn execute(service: &SchedulerService, step: Step) -> anyhow::Result<Value> {
    let value = match step {
        Step::RunInstance {
            request,
            reservations,
        } => serde_json::to_value(service.run_instance(request, &reservations)?)?,
        Step::PrepResize {
            request,
            reservations,
        } => serde_json::to_value(service.prep_resize(request, &reservations)?)?,
        Step::LiveMigration { request } => {
            let destination = service.live_migration(&request)?;
            json!({ "destination": destination.host() })
        }
        Step::SelectHosts { request } => json!({ "hosts": service.select_hosts(&request)? }),
        Step::ShowHostResources { host } => serde_json::to_value(service.show_host_resources(&host)?)?,
        Step::ExpireReservations => json!({ "expired": service.expire_reservations()? }),
        Step::Report { .. } => anyhow::bail!("capability reports are ingested asynchronously"),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_placement::{CapabilityStore, PlacementEngine};
    use corral_scheduler::{Collaborators, SchedulerConfig};
    use corral_state::VmState;

    fn build(config: SchedulerConfig) -> (Arc<SchedulerService>, StateStore, Arc<RecordingNotifier>) {
        let store = StateStore::open_in_memory().unwrap();
        let recorded = Arc::new(RecordingNotifier::new());
        let engine =
            PlacementEngine::from_config(Arc::new(CapabilityStore::new()), &config.placement).unwrap();
        let collaborators = Collaborators::from_store(
            store.clone(),
            Arc::new(DaemonNotifier::new(recorded.clone())),
        );
        (
            Arc::new(SchedulerService::new(engine, collaborators, config)),
            store,
            recorded,
        )
    }

    fn scenario(value: Value) -> Scenario {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let (service, store, recorded) = build(SchedulerConfig::default());
        let scenario = scenario(json!({
            "reports": [
                {"host": "h1", "capabilities": {"vcpus": 4, "memory_mb": 4096, "local_gb": 40}},
                {"host": "h2", "capabilities": {"vcpus": 4, "memory_mb": 8192, "local_gb": 40}}
            ],
            "workloads": [{
                "id": "w1", "project_id": "p1", "vm_state": "building",
                "vcpus": 1, "memory_mb": 512, "root_gb": 1, "ephemeral_gb": 0, "updated_at": 0
            }],
            "steps": [
                {"op": "run_instance", "request": {"workload_ids": ["w1"], "resources": {"vcpus": 1, "memory_mb": 512, "disk_gb": 1}}},
                {"op": "select_hosts", "request": {"resources": {"vcpus": 100, "memory_mb": 0, "disk_gb": 0}}},
                {"op": "show_host_resources", "host": "h1"}
            ]
        }));

        let report = run_scenario(service, store, recorded, scenario).await.unwrap();

        assert_eq!(report.steps.len(), 3);
        let placed = report.steps[0].result.as_ref().unwrap();
        assert_eq!(placed["outcome"], "scheduled");
        assert_eq!(placed["placements"][0]["host"], "h2");
        // 100 vcpus exceed even the overcommitted capacity.
        assert!(report.steps[1].error.as_ref().unwrap().contains("no valid host"));
        assert!(report.steps[2].error.as_ref().unwrap().contains("compute node not found"));
        assert_eq!(report.workloads[0].host.as_deref(), Some("h2"));
        assert_eq!(report.workloads[0].vm_state, VmState::Building);
        assert!(report.notifications.is_empty());
    }

    #[tokio::test]
    async fn reports_between_steps_are_visible() {
        let (service, store, recorded) = build(SchedulerConfig::default());
        let scenario = scenario(json!({
            "steps": [
                {"op": "select_hosts", "request": {"resources": {"vcpus": 1, "memory_mb": 0, "disk_gb": 0}}},
                {"op": "report", "reports": [{"host": "late", "capabilities": {"vcpus": 2, "memory_mb": 2048}}]},
                {"op": "select_hosts", "request": {"resources": {"vcpus": 1, "memory_mb": 0, "disk_gb": 0}}}
            ]
        }));

        let report = run_scenario(service, store, recorded, scenario).await.unwrap();

        assert!(report.steps[0].error.is_some());
        assert_eq!(report.steps[1].result.as_ref().unwrap()["facts"], 1);
        assert_eq!(report.steps[2].result.as_ref().unwrap()["hosts"][0], "late");
    }

    #[tokio::test]
    async fn expiry_loop_stops_on_shutdown() {
        let (service, store, _) = build(SchedulerConfig::default());
        store
            .put_reservation(&corral_state::Reservation {
                id: "r1".to_string(),
                project_id: "p1".to_string(),
                resource: "cores".to_string(),
                delta: 1,
                expires_at: 0,
            })
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(expiry_loop(service, Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.list_reservations().unwrap().is_empty());
    }
}
