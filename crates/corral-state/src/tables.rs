//! redb table definitions for the corral state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Workload records keyed by `{workload_id}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Compute node inventory keyed by `{host}`.
pub const COMPUTE_NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("compute_nodes");

/// Quota reservations keyed by `{reservation_id}`.
pub const RESERVATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("reservations");
