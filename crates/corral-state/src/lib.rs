//! corral-state: persistence collaborator for the corral scheduler.
//!
//! Backed by [redb](https://docs.rs/redb), holds the records the scheduler
//! reads and compensates against but never owns: workload (instance) records,
//! the compute-node inventory used for resource reporting, and quota
//! reservations tied to in-flight operations.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Workloads are keyed by id, compute nodes by host name and reservations by
//! reservation id. State transitions go through
//! [`StateStore::update_workload_and_get_original`], which reads, checks the
//! expected task state, and writes inside a single write transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across tasks and blocking workers.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, epoch_secs};
pub use types::*;
