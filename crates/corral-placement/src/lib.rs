//! corral placement: host selection for workload placement requests.
//!
//! Worker hosts push capability reports into a [`CapabilityStore`]. A
//! placement request takes a private snapshot of the store, narrows it with
//! an ordered [`FilterPipeline`], ranks the survivors with a
//! [`WeigherPipeline`] and picks the best host per workload. Within one
//! batch the engine simulates the resource consumption of each pick on its
//! snapshot, so later workloads see the reduced capacity. Nothing simulated
//! is written back to the store.
//!
//! # Components
//!
//! - **`host_state`**: `HostState`, resource accounting, capability parsing
//! - **`capability`**: sharded in-memory store of the latest reports
//! - **`request`**: placement and migration requests, filter properties
//! - **`filter`** / **`filters`**: filter trait, pipeline, built-in filters
//! - **`weigher`**: weigher trait, pipeline, built-in weighers
//! - **`registry`**: name → filter/weigher resolution from config
//! - **`engine`**: batch placement and live-migration destination selection

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod filters;
pub mod host_state;
pub mod migration;
pub mod registry;
pub mod request;
pub mod weigher;

pub use capability::{CapabilityPayload, CapabilityStore};
pub use config::{PlacementConfig, WeigherEntry};
pub use engine::PlacementEngine;
pub use error::{ErrorKind, PlacementError, PlacementResult};
pub use filter::{FilterOutcome, FilterPipeline, FilterVerdict, HostFilter, Rejection};
pub use host_state::{COMPUTE_SERVICE, Capabilities, HostKey, HostState, Resources};
pub use request::{
    AntiAffinityGroup, FilterProperties, MigrationContext, MigrationRequest, PlacementContext,
    PlacementRequest, RetryInfo, SchedulerHints,
};
pub use weigher::{HostWeigher, WeighedHost, WeigherPipeline};
