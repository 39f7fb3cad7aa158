//! Host state: the scheduler's view of one worker host.
//!
//! A `HostState` is derived from a capability report: the well-known keys
//! (`vcpus`, `memory_mb`, `local_gb`, their `_used` counterparts,
//! `num_instances`, ...) populate typed resource fields, and the whole
//! mapping is kept for filters that look at free-form features.

use std::fmt;
use std::net::IpAddr;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form capability mapping. Keys are ordered, so snapshots compare
/// and serialize deterministically.
pub type Capabilities = serde_json::Map<String, Value>;

/// Logical service name of hypervisor hosts.
pub const COMPUTE_SERVICE: &str = "compute";

/// Identifies one entry in the capability store.
///
/// Ordering is by host name first, then service, and is the tie-break
/// order used when ranking hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey {
    pub host: String,
    pub service: String,
}

impl HostKey {
    pub fn new(service: &str, host: &str) -> Self {
        Self {
            host: host.to_string(),
            service: service.to_string(),
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service, self.host)
    }
}

/// CPU, memory and disk amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl Resources {
    pub fn new(vcpus: u32, memory_mb: u64, disk_gb: u64) -> Self {
        Self {
            vcpus,
            memory_mb,
            disk_gb,
        }
    }
}

/// Latest known state of a (service, host) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub key: HostKey,
    pub total: Resources,
    pub used: Resources,
    pub num_instances: u32,
    pub capabilities: Capabilities,
    /// Unix timestamp (seconds) of the report this state was built from.
    pub updated_at: u64,
}

impl HostState {
    /// Build a host state from a full capability mapping.
    ///
    /// Missing resource keys read as zero; a report replaces the previous
    /// state entirely, so nothing is inherited from earlier reports.
    pub fn from_capabilities(key: HostKey, capabilities: Capabilities, updated_at: u64) -> Self {
        let total = Resources {
            vcpus: read_u32(&capabilities, "vcpus"),
            memory_mb: read_u64(&capabilities, "memory_mb"),
            disk_gb: read_u64(&capabilities, "local_gb"),
        };
        let used = Resources {
            vcpus: read_u32(&capabilities, "vcpus_used"),
            memory_mb: read_u64(&capabilities, "memory_mb_used"),
            disk_gb: read_u64(&capabilities, "local_gb_used"),
        };
        let num_instances = read_u32(&capabilities, "num_instances");

        Self {
            key,
            total,
            used,
            num_instances,
            capabilities,
            updated_at,
        }
    }

    pub fn host(&self) -> &str {
        &self.key.host
    }

    pub fn service(&self) -> &str {
        &self.key.service
    }

    /// Unused capacity without overcommit.
    pub fn free(&self) -> Resources {
        Resources {
            vcpus: self.total.vcpus.saturating_sub(self.used.vcpus),
            memory_mb: self.total.memory_mb.saturating_sub(self.used.memory_mb),
            disk_gb: self.total.disk_gb.saturating_sub(self.used.disk_gb),
        }
    }

    /// Record one more workload of size `req` on this host.
    pub fn consume(&mut self, req: &Resources) {
        self.used.vcpus = self.used.vcpus.saturating_add(req.vcpus);
        self.used.memory_mb = self.used.memory_mb.saturating_add(req.memory_mb);
        self.used.disk_gb = self.used.disk_gb.saturating_add(req.disk_gb);
        self.num_instances = self.num_instances.saturating_add(1);
    }

    /// Whether the report is no older than `max_age_secs` at time `now`.
    pub fn is_fresh(&self, now: u64, max_age_secs: u64) -> bool {
        now.saturating_sub(self.updated_at) <= max_age_secs
    }

    pub fn is_disabled(&self) -> bool {
        self.capabilities
            .get("disabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn availability_zone(&self) -> Option<&str> {
        self.capabilities.get("availability_zone").and_then(Value::as_str)
    }

    pub fn hypervisor_type(&self) -> Option<&str> {
        self.capabilities.get("hypervisor_type").and_then(Value::as_str)
    }

    pub fn hypervisor_version(&self) -> Option<Version> {
        self.capabilities
            .get("hypervisor_version")
            .and_then(parse_hypervisor_version)
    }

    pub fn host_ip(&self) -> Option<IpAddr> {
        self.capabilities
            .get("host_ip")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Identifier of the storage pool this host's instance disks live on.
    pub fn shared_storage(&self) -> Option<&str> {
        self.capabilities.get("shared_storage").and_then(Value::as_str)
    }

    /// A capability rendered as text, for comparison with string constraints.
    pub fn capability_text(&self, key: &str) -> Option<String> {
        match self.capabilities.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Read a non-negative integer capability, accepting numeric strings.
fn read_u64(caps: &Capabilities, key: &str) -> u64 {
    match caps.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Like [`read_u64`]; values that do not fit a `u32` are malformed and read as zero.
fn read_u32(caps: &Capabilities, key: &str) -> u32 {
    u32::try_from(read_u64(caps, key)).unwrap_or(0)
}

/// Parse a hypervisor version.
///
/// Integers use the packed `MMMmmmppp` form (`1002003` is 1.2.3); strings
/// are semver, with missing minor/patch components treated as zero.
pub fn parse_hypervisor_version(value: &Value) -> Option<Version> {
    match value {
        Value::Number(n) => {
            let packed = n.as_u64()?;
            Some(Version::new(
                packed / 1_000_000,
                (packed / 1_000) % 1_000,
                packed % 1_000,
            ))
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = Version::parse(s) {
                return Some(v);
            }
            let mut parts = s.split('.').map(|p| p.parse::<u64>());
            let major = parts.next()?.ok()?;
            let minor = parts.next().transpose().ok()?.unwrap_or(0);
            let patch = parts.next().transpose().ok()?.unwrap_or(0);
            if parts.next().is_some() {
                return None;
            }
            Some(Version::new(major, minor, patch))
        }
        _ => None,
    }
}
