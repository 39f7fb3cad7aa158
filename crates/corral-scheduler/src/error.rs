//! Scheduler error types.

use corral_placement::{ErrorKind, PlacementError};
use corral_state::StateError;
use thiserror::Error;

/// Errors surfaced by the scheduler service.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("compute node not found: {0}")]
    HostNotFound(String),
}

impl SchedulerError {
    /// Placement error kind, if this came from the engine.
    pub fn placement_kind(&self) -> Option<ErrorKind> {
        match self {
            SchedulerError::Placement(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_no_valid_host(&self) -> bool {
        self.placement_kind() == Some(ErrorKind::NoValidHost)
    }

    /// Fault code recorded on the workload: 400 for scheduling outcomes the
    /// caller can act on, 500 for internal faults.
    pub fn fault_code(&self) -> u16 {
        match self.placement_kind() {
            Some(ErrorKind::Configuration | ErrorKind::Internal) | None => 500,
            Some(_) => 400,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
