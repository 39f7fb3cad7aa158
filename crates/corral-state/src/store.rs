//! StateStore: redb-backed persistence for corral.
//!
//! Provides typed operations over workloads, compute nodes and quota
//! reservations. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(COMPUTE_NODES).map_err(map_err!(Table))?;
        txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or replace a workload record.
    pub fn put_workload(&self, record: &WorkloadRecord) -> StateResult<()> {
        self.put_json(WORKLOADS, &record.id, record)?;
        debug!(workload = %record.id, "workload stored");
        Ok(())
    }

    /// Get a workload by id.
    pub fn get_workload(&self, id: &str) -> StateResult<Option<WorkloadRecord>> {
        self.get_json(WORKLOADS, id)
    }

    /// List all workloads.
    pub fn list_workloads(&self) -> StateResult<Vec<WorkloadRecord>> {
        self.list_json(WORKLOADS)
    }

    /// List the workloads currently assigned to `host`.
    pub fn list_workloads_by_host(&self, host: &str) -> StateResult<Vec<WorkloadRecord>> {
        let mut records = self.list_workloads()?;
        records.retain(|w| w.host.as_deref() == Some(host));
        Ok(records)
    }

    /// Apply `update` to a workload and return `(original, updated)`.
    ///
    /// Read, expected-task-state check and write happen in one write
    /// transaction, so concurrent updates to the same workload serialize.
    pub fn update_workload_and_get_original(
        &self,
        id: &str,
        update: &WorkloadUpdate,
    ) -> StateResult<(WorkloadRecord, WorkloadRecord)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (original, updated) = {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            let original: WorkloadRecord = {
                let guard = table
                    .get(id)
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(format!("workload {id}")))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };

            if let Some(expected) = update.expected_task_state {
                if original.task_state != Some(expected) {
                    return Err(StateError::UnexpectedTaskState {
                        workload_id: id.to_string(),
                        expected,
                        actual: original.task_state,
                    });
                }
            }

            let mut updated = original.clone();
            update.apply(&mut updated, epoch_secs());
            let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            (original, updated)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            workload = %id,
            from = %original.vm_state,
            to = %updated.vm_state,
            "workload updated"
        );
        Ok((original, updated))
    }

    // ── Compute nodes ──────────────────────────────────────────────

    /// Insert or replace a compute node record.
    pub fn put_compute_node(&self, node: &ComputeNodeRecord) -> StateResult<()> {
        self.put_json(COMPUTE_NODES, &node.host, node)
    }

    /// Get the compute node record for `host`.
    pub fn get_compute_node(&self, host: &str) -> StateResult<Option<ComputeNodeRecord>> {
        self.get_json(COMPUTE_NODES, host)
    }

    // ── Reservations ───────────────────────────────────────────────

    /// Insert or replace a reservation.
    pub fn put_reservation(&self, reservation: &Reservation) -> StateResult<()> {
        self.put_json(RESERVATIONS, &reservation.id, reservation)
    }

    /// List all outstanding reservations.
    pub fn list_reservations(&self) -> StateResult<Vec<Reservation>> {
        self.list_json(RESERVATIONS)
    }

    /// Remove the given reservations. Returns how many existed.
    pub fn rollback_reservations(&self, ids: &[String]) -> StateResult<u32> {
        let removed = self.remove_keys(RESERVATIONS, ids)?;
        debug!(requested = ids.len(), removed, "reservations rolled back");
        Ok(removed)
    }

    /// Remove reservations whose `expires_at` is at or before `now`.
    pub fn expire_reservations(&self, now: u64) -> StateResult<u32> {
        let expired: Vec<String> = self
            .list_reservations()?
            .into_iter()
            .filter(|r| r.expires_at <= now)
            .map(|r| r.id)
            .collect();
        let removed = self.remove_keys(RESERVATIONS, &expired)?;
        if removed > 0 {
            debug!(removed, "expired reservations removed");
        }
        Ok(removed)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn remove_keys(&self, def: JsonTable, keys: &[String]) -> StateResult<u32> {
        if keys.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
