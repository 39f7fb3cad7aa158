//! Capability store: latest reported state per (service, host).
//!
//! Entries live in a fixed number of shards, each behind its own
//! `RwLock`. An update builds the new `HostState` outside any lock and
//! swaps an `Arc` into one shard, so reports from unrelated hosts rarely
//! contend and a reader never observes a half-written entry. Snapshots
//! clone the `Arc`s shard by shard and hand back owned copies.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host_state::{Capabilities, HostKey, HostState};

const DEFAULT_SHARDS: usize = 16;

/// Reserved capability key that attributes a mapping to another service.
const SERVICE_KEY: &str = "service";

/// Body of a capability report: one mapping, `null`, or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityPayload {
    Many(Vec<Option<Capabilities>>),
    Single(Option<Capabilities>),
}

impl CapabilityPayload {
    /// Flatten into independent capability facts, `null` becoming empty.
    pub fn into_facts(self) -> Vec<Capabilities> {
        match self {
            CapabilityPayload::Single(c) => vec![c.unwrap_or_default()],
            CapabilityPayload::Many(list) => {
                list.into_iter().map(Option::unwrap_or_default).collect()
            }
        }
    }
}

impl From<Capabilities> for CapabilityPayload {
    fn from(c: Capabilities) -> Self {
        CapabilityPayload::Single(Some(c))
    }
}

type Shard = RwLock<HashMap<HostKey, Arc<HostState>>>;

/// Concurrent in-memory store of host capability snapshots.
pub struct CapabilityStore {
    shards: Vec<Shard>,
}

impl CapabilityStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    /// Fold a capability report from `host` into the store, stamped now.
    ///
    /// Returns the number of capability facts folded.
    pub fn update(&self, service_name: &str, host: &str, payload: CapabilityPayload) -> usize {
        self.update_at(service_name, host, payload, epoch_secs())
    }

    /// Fold a capability report with an explicit timestamp.
    ///
    /// Each fact replaces the entry for its (service, host) pair wholesale.
    /// A fact carrying a string `service` key is attributed to that service
    /// instead of `service_name`.
    pub fn update_at(
        &self,
        service_name: &str,
        host: &str,
        payload: CapabilityPayload,
        now: u64,
    ) -> usize {
        let facts = payload.into_facts();
        let count = facts.len();
        for mut caps in facts {
            let service = match caps.remove(SERVICE_KEY) {
                Some(serde_json::Value::String(s)) => s,
                _ => service_name.to_string(),
            };
            let key = HostKey::new(&service, host);
            let state = Arc::new(HostState::from_capabilities(key.clone(), caps, now));

            let mut shard = self.shard(&key).write().unwrap_or_else(PoisonError::into_inner);
            let replaced = shard.insert(key.clone(), state).is_some();
            drop(shard);

            debug!(%key, replaced, "capabilities updated");
        }
        count
    }

    /// Current state of one (service, host) pair.
    pub fn get(&self, service_name: &str, host: &str) -> Option<HostState> {
        let key = HostKey::new(service_name, host);
        let shard = self.shard(&key).read().unwrap_or_else(PoisonError::into_inner);
        shard.get(&key).map(|s| HostState::clone(s))
    }

    /// Point-in-time copy of every entry, sorted by key.
    pub fn snapshot(&self) -> Vec<HostState> {
        let mut entries: Vec<Arc<HostState>> = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().unwrap_or_else(PoisonError::into_inner);
            entries.extend(shard.values().cloned());
        }
        let mut hosts: Vec<HostState> = entries.iter().map(|s| HostState::clone(s)).collect();
        hosts.sort_by(|a, b| a.key.cmp(&b.key));
        hosts
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &HostKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }
}

impl Default for CapabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
