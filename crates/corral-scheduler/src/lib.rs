//! corral-scheduler: the scheduler service façade.
//!
//! Receives run, resize and live-migration requests, asks the
//! [`corral_placement::PlacementEngine`] for hosts and turns the outcome
//! into workload state transitions. Collaborators (workload database,
//! quota driver, notifier) are injected at construction.
//!
//! # Failure handling
//!
//! ```text
//! request ──▶ engine ──┬── Ok ─────────────▶ Scheduled
//!                      ├── NoValidHost ────▶ compensate ─▶ Failed (not an error)
//!                      └── anything else ──▶ compensate ─▶ Err(..)
//! ```
//!
//! Compensation runs once per failed attempt: one workload update with the
//! fault attached, a state-update notification, an error notification and
//! a quota rollback.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod service;

pub use collaborators::{
    Collaborators, LogNotifier, Notification, Notifier, Priority, QuotaDriver, RecordingNotifier,
    WorkloadDb,
};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use service::{
    HostResources, Placement, ProjectUsage, ResizeRequest, ResourceTotals, ScheduleOutcome,
    SchedulerService,
};
