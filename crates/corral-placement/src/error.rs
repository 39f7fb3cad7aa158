//! Placement error types.
//!
//! Every failure carries an [`ErrorKind`] so callers can decide how to
//! compensate without matching on messages.

use thiserror::Error;

/// Classification of a placement failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoValidHost,
    ComputeServiceUnavailable,
    InvalidHypervisorType,
    UnableToMigrateToSelf,
    DestinationHypervisorTooOld,
    InvalidLocalStorage,
    InvalidSharedStorage,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Whether the kind is a live-migration constraint violation.
    pub fn is_migration_constraint(self) -> bool {
        matches!(
            self,
            ErrorKind::ComputeServiceUnavailable
                | ErrorKind::InvalidHypervisorType
                | ErrorKind::UnableToMigrateToSelf
                | ErrorKind::DestinationHypervisorTooOld
                | ErrorKind::InvalidLocalStorage
                | ErrorKind::InvalidSharedStorage
        )
    }
}

/// Errors produced by the placement engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("no valid host was found: {reason}")]
    NoValidHost { reason: String },

    #[error("compute service of {host} is unavailable at this time")]
    ComputeServiceUnavailable { host: String },

    #[error("destination {destination} runs hypervisor {destination_type}, source runs {source_type}")]
    InvalidHypervisorType {
        destination: String,
        source_type: String,
        destination_type: String,
    },

    #[error("unable to migrate workload {workload_id} to its current host {host}")]
    UnableToMigrateToSelf { workload_id: String, host: String },

    #[error("destination {destination} hypervisor version {destination_version} is older than source version {source_version}")]
    DestinationHypervisorTooOld {
        destination: String,
        source_version: String,
        destination_version: String,
    },

    #[error("block migration to {destination} needs local storage, but it shares storage with {source_host}")]
    InvalidLocalStorage { source_host: String, destination: String },

    #[error("live migration to {destination} needs storage shared with {source_host}")]
    InvalidSharedStorage { source_host: String, destination: String },

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("unknown weigher: {0}")]
    UnknownWeigher(String),

    #[error("internal placement error: {0}")]
    Internal(String),
}

impl PlacementError {
    pub fn no_valid_host(reason: impl Into<String>) -> Self {
        PlacementError::NoValidHost {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlacementError::NoValidHost { .. } => ErrorKind::NoValidHost,
            PlacementError::ComputeServiceUnavailable { .. } => ErrorKind::ComputeServiceUnavailable,
            PlacementError::InvalidHypervisorType { .. } => ErrorKind::InvalidHypervisorType,
            PlacementError::UnableToMigrateToSelf { .. } => ErrorKind::UnableToMigrateToSelf,
            PlacementError::DestinationHypervisorTooOld { .. } => {
                ErrorKind::DestinationHypervisorTooOld
            }
            PlacementError::InvalidLocalStorage { .. } => ErrorKind::InvalidLocalStorage,
            PlacementError::InvalidSharedStorage { .. } => ErrorKind::InvalidSharedStorage,
            PlacementError::UnknownFilter(_) | PlacementError::UnknownWeigher(_) => {
                ErrorKind::Configuration
            }
            PlacementError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_no_valid_host(&self) -> bool {
        self.kind() == ErrorKind::NoValidHost
    }
}

pub type PlacementResult<T> = Result<T, PlacementError>;
