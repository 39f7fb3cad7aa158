//! External collaborators of the scheduler service.
//!
//! The scheduler never owns workload records, quota or the event bus. It
//! reaches them through these traits, which are handed to
//! [`SchedulerService::new`](crate::SchedulerService::new) in a
//! [`Collaborators`] bundle. [`StateStore`] implements the database and
//! quota sides.

use std::sync::{Arc, Mutex, PoisonError};

use corral_state::{
    ComputeNodeRecord, StateResult, StateStore, WorkloadRecord, WorkloadUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

/// Workload persistence used for hint resolution, compensation and
/// resource reporting.
pub trait WorkloadDb: Send + Sync {
    fn get_workload(&self, id: &str) -> StateResult<Option<WorkloadRecord>>;

    /// Apply `update` atomically, returning the records before and after.
    fn update_and_get_original(
        &self,
        id: &str,
        update: &WorkloadUpdate,
    ) -> StateResult<(WorkloadRecord, WorkloadRecord)>;

    fn workloads_on_host(&self, host: &str) -> StateResult<Vec<WorkloadRecord>>;

    fn compute_node(&self, host: &str) -> StateResult<Option<ComputeNodeRecord>>;
}

/// Quota reservations tied to in-flight operations.
pub trait QuotaDriver: Send + Sync {
    /// Release reservations of a failed attempt. Returns how many existed.
    fn rollback(&self, reservations: &[String]) -> StateResult<u32>;

    /// Drop reservations that expired at or before `now`.
    fn expire(&self, now: u64) -> StateResult<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Info,
    Error,
}

/// A structured event published to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event_type: String,
    pub priority: Priority,
    pub payload: Value,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// The collaborators a [`SchedulerService`](crate::SchedulerService) is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub db: Arc<dyn WorkloadDb>,
    pub quota: Arc<dyn QuotaDriver>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Use `store` for both the workload database and quota.
    pub fn from_store(store: StateStore, notifier: Arc<dyn Notifier>) -> Self {
        let store = Arc::new(store);
        Self {
            db: store.clone(),
            quota: store,
            notifier,
        }
    }
}

impl WorkloadDb for StateStore {
    fn get_workload(&self, id: &str) -> StateResult<Option<WorkloadRecord>> {
        StateStore::get_workload(self, id)
    }

    fn update_and_get_original(
        &self,
        id: &str,
        update: &WorkloadUpdate,
    ) -> StateResult<(WorkloadRecord, WorkloadRecord)> {
        self.update_workload_and_get_original(id, update)
    }

    fn workloads_on_host(&self, host: &str) -> StateResult<Vec<WorkloadRecord>> {
        self.list_workloads_by_host(host)
    }

    fn compute_node(&self, host: &str) -> StateResult<Option<ComputeNodeRecord>> {
        self.get_compute_node(host)
    }
}

impl QuotaDriver for StateStore {
    fn rollback(&self, reservations: &[String]) -> StateResult<u32> {
        self.rollback_reservations(reservations)
    }

    fn expire(&self, now: u64) -> StateResult<u32> {
        self.expire_reservations(now)
    }
}

/// Publishes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.priority {
            Priority::Info => info!(
                event = %notification.event_type,
                payload = %notification.payload,
                "notification"
            ),
            Priority::Error => error!(
                event = %notification.event_type,
                payload = %notification.payload,
                "notification"
            ),
        }
    }
}

/// Keeps every notification in memory, for tests and the simulator report.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events of one type, in publication order.
    pub fn of_type(&self, event_type: &str) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|n| n.event_type == event_type)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
