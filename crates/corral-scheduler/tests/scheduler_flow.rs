//! End-to-end scheduler flows against a redb-backed store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use corral_placement::{
    CapabilityPayload, CapabilityStore, ErrorKind, MigrationRequest, PlacementEngine,
    PlacementRequest, Resources,
};
use corral_scheduler::{
    Collaborators, QuotaDriver, RecordingNotifier, ScheduleOutcome, SchedulerConfig,
    SchedulerError, SchedulerService, WorkloadDb,
};
use corral_state::{
    ComputeNodeRecord, Reservation, StateResult, StateStore, TaskState, VmState, WorkloadRecord,
    WorkloadUpdate,
};
use serde_json::json;

/// Counts workload writes on top of a real store.
struct CountingDb {
    inner: StateStore,
    writes: AtomicUsize,
}

impl WorkloadDb for CountingDb {
    fn get_workload(&self, id: &str) -> StateResult<Option<WorkloadRecord>> {
        self.inner.get_workload(id)
    }

    fn update_and_get_original(
        &self,
        id: &str,
        update: &WorkloadUpdate,
    ) -> StateResult<(WorkloadRecord, WorkloadRecord)> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_workload_and_get_original(id, update)
    }

    fn workloads_on_host(&self, host: &str) -> StateResult<Vec<WorkloadRecord>> {
        self.inner.list_workloads_by_host(host)
    }

    fn compute_node(&self, host: &str) -> StateResult<Option<ComputeNodeRecord>> {
        self.inner.get_compute_node(host)
    }
}

struct Harness {
    service: SchedulerService,
    store: StateStore,
    db: Arc<CountingDb>,
    notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

fn harness(config: SchedulerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(&dir.path().join("corral.redb")).unwrap();
    let db = Arc::new(CountingDb {
        inner: store.clone(),
        writes: AtomicUsize::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let quota: Arc<dyn QuotaDriver> = Arc::new(store.clone());
    let engine =
        PlacementEngine::from_config(Arc::new(CapabilityStore::new()), &config.placement).unwrap();
    let service = SchedulerService::new(
        engine,
        Collaborators {
            db: db.clone(),
            quota,
            notifier: notifier.clone(),
        },
        config,
    );
    Harness {
        service,
        store,
        db,
        notifier,
        _dir: dir,
    }
}

fn workload(id: &str, project: &str, host: Option<&str>) -> WorkloadRecord {
    WorkloadRecord {
        id: id.to_string(),
        project_id: project.to_string(),
        host: host.map(str::to_string),
        node: None,
        vm_state: VmState::Building,
        task_state: Some(TaskState::Scheduling),
        vcpus: 2,
        memory_mb: 2048,
        root_gb: 20,
        ephemeral_gb: 5,
        fault: None,
        scheduled_at: None,
        updated_at: 0,
    }
}

fn payload(value: serde_json::Value) -> CapabilityPayload {
    serde_json::from_value(value).unwrap()
}

fn reserve(store: &StateStore, id: &str) {
    store
        .put_reservation(&Reservation {
            id: id.to_string(),
            project_id: "p1".to_string(),
            resource: "cores".to_string(),
            delta: 2,
            expires_at: u64::MAX,
        })
        .unwrap();
}

#[test]
fn batch_spreads_by_consumed_capacity() {
    let mut config = SchedulerConfig::default();
    config.placement.cpu_allocation_ratio = 1.0;
    config.placement.weighers = vec![corral_placement::WeigherEntry::new("CpuWeigher", 1.0)];
    let h = harness(config);

    h.service.update_service_capabilities("compute", "host-b", payload(json!({"vcpus": 2, "memory_mb": 8192, "local_gb": 100})));
    h.service.update_service_capabilities("compute", "host-a", payload(json!({"vcpus": 4, "memory_mb": 8192, "local_gb": 100})));
    for id in ["w1", "w2", "w3"] {
        h.store.put_workload(&workload(id, "p1", None)).unwrap();
    }

    let ids = vec!["w1".to_string(), "w2".to_string(), "w3".to_string()];
    let request = PlacementRequest::new(ids, Resources::new(2, 512, 10));
    let outcome = h.service.run_instance(request, &[]).unwrap();

    let ScheduleOutcome::Scheduled { placements, .. } = outcome else {
        panic!("expected placements");
    };
    let hosts: Vec<&str> = placements.iter().map(|p| p.host.as_str()).collect();
    assert_eq!(hosts, vec!["host-a", "host-a", "host-b"]);
    assert_eq!(
        h.store.get_workload("w3").unwrap().unwrap().host.as_deref(),
        Some("host-b")
    );
}

#[test]
fn no_valid_host_writes_each_workload_once() {
    let h = harness(SchedulerConfig::default());
    h.store.put_workload(&workload("w1", "p1", None)).unwrap();
    reserve(&h.store, "r1");

    let request = PlacementRequest::new(vec!["w1".to_string()], Resources::new(1, 128, 1));
    let outcome = h.service.run_instance(request, &["r1".to_string()]).unwrap();

    assert!(matches!(outcome, ScheduleOutcome::Failed { .. }));
    assert_eq!(h.db.writes.load(Ordering::SeqCst), 1);

    let record = h.store.get_workload("w1").unwrap().unwrap();
    assert_eq!(record.vm_state, VmState::Error);
    assert_eq!(record.task_state, None);
    assert!(record.fault.is_some());

    assert!(h.store.list_reservations().unwrap().is_empty());
    let errors = h.notifier.of_type("scheduler.run_instance");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["workload_id"], "w1");
    assert_eq!(errors[0].payload["state"], "error");
}

fn migration_fleet(h: &Harness) {
    for (host, version, pool) in [("src", "2.0", "pool1"), ("dst", "2.2", "pool1"), ("legacy", "1.0", "pool1")] {
        h.service.update_service_capabilities(
            "compute",
            host,
            payload(json!({
                "vcpus": 16,
                "memory_mb": 32768,
                "local_gb": 500,
                "hypervisor_type": "kvm",
                "hypervisor_version": version,
                "shared_storage": pool,
            })),
        );
    }
    let mut record = workload("vm", "p1", Some("src"));
    record.vm_state = VmState::Active;
    record.task_state = Some(TaskState::Migrating);
    h.store.put_workload(&record).unwrap();
}

fn migrate(destination: Option<&str>) -> MigrationRequest {
    MigrationRequest {
        workload_id: "vm".to_string(),
        source_host: "src".to_string(),
        destination: destination.map(str::to_string),
        block_migration: false,
        disk_over_commit: false,
        resources: Resources::new(2, 2048, 20),
    }
}

#[test]
fn live_migration_picks_compatible_host() {
    let h = harness(SchedulerConfig::default());
    migration_fleet(&h);

    let destination = h.service.live_migration(&migrate(None)).unwrap();
    assert_eq!(destination.host(), "dst");
    assert_eq!(h.db.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn live_migration_failure_is_compensated_and_raised() {
    let h = harness(SchedulerConfig::default());
    migration_fleet(&h);

    let err = h.service.live_migration(&migrate(Some("legacy"))).unwrap_err();
    assert_eq!(err.placement_kind(), Some(ErrorKind::DestinationHypervisorTooOld));

    let record = h.store.get_workload("vm").unwrap().unwrap();
    assert_eq!(record.vm_state, VmState::Active);
    assert_eq!(record.task_state, None);
    let errors = h.notifier.of_type("scheduler.live_migration");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["state"], "active");

    // Already compensated: the expected task state no longer matches.
    let err = h.service.live_migration(&migrate(Some("src"))).unwrap_err();
    assert_eq!(err.placement_kind(), Some(ErrorKind::UnableToMigrateToSelf));
    assert_eq!(h.notifier.of_type("compute.instance.update").len(), 1);
}

#[test]
fn host_resources_sum_usage_per_project() {
    let h = harness(SchedulerConfig::default());
    h.store
        .put_compute_node(&ComputeNodeRecord {
            host: "h1".to_string(),
            vcpus: 32,
            memory_mb: 65536,
            local_gb: 1000,
            vcpus_used: 6,
            memory_mb_used: 6144,
            local_gb_used: 75,
            hypervisor_type: "kvm".to_string(),
            hypervisor_version: 2_000_000,
            updated_at: 0,
        })
        .unwrap();
    for (id, project) in [("a", "p1"), ("b", "p1"), ("c", "p2")] {
        h.store.put_workload(&workload(id, project, Some("h1"))).unwrap();
    }
    h.store.put_workload(&workload("elsewhere", "p1", Some("h2"))).unwrap();

    let resources = h.service.show_host_resources("h1").unwrap();
    assert_eq!(resources.total.vcpus, 32);
    assert_eq!(resources.used_now.local_gb, 75);
    assert_eq!(resources.usage.len(), 2);
    assert_eq!(resources.usage["p1"].vcpus, 4);
    assert_eq!(resources.usage["p1"].ephemeral_gb, 10);
    assert_eq!(resources.usage["p2"].memory_mb, 2048);

    assert!(matches!(
        h.service.show_host_resources("h9"),
        Err(SchedulerError::HostNotFound(_))
    ));
}

#[test]
fn expired_reservations_are_purged() {
    let h = harness(SchedulerConfig::default());
    h.store
        .put_reservation(&Reservation {
            id: "old".to_string(),
            project_id: "p1".to_string(),
            resource: "ram".to_string(),
            delta: 512,
            expires_at: 1,
        })
        .unwrap();
    reserve(&h.store, "live");

    assert_eq!(h.service.expire_reservations().unwrap(), 1);
    let left: Vec<String> = h
        .store
        .list_reservations()
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(left, vec!["live"]);
}

#[tokio::test]
async fn concurrent_reports_and_placements() {
    let mut config = SchedulerConfig::default();
    config.placement.cpu_allocation_ratio = 1.0;
    let h = harness(config);
    let service = Arc::new(h.service);

    let mut reporters = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        reporters.push(tokio::spawn(async move {
            for round in 0..20u32 {
                service.update_service_capabilities(
                    "compute",
                    &format!("host-{i}"),
                    payload(json!({"vcpus": 8, "memory_mb": 16384, "local_gb": 200, "round": round})),
                );
                tokio::task::yield_now().await;
            }
        }));
    }
    for reporter in reporters {
        reporter.await.unwrap();
    }

    let mut placers = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        placers.push(tokio::task::spawn_blocking(move || {
            let request = PlacementRequest::new(
                vec!["a".to_string(), "b".to_string()],
                Resources::new(4, 1024, 10),
            );
            service.select_hosts(&request)
        }));
    }
    for placer in placers {
        let hosts = placer.await.unwrap().unwrap();
        assert_eq!(hosts.len(), 2);
    }
    assert_eq!(service.engine().store().len(), 8);
}
