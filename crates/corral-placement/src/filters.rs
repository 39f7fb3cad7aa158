//! Built-in host filters.

use std::net::IpAddr;

use crate::filter::{FilterVerdict, HostFilter};
use crate::host_state::{COMPUTE_SERVICE, HostState};
use crate::migration::check_compatibility;
use crate::request::PlacementContext;

/// Skip hosts tried by earlier attempts of the same request.
pub struct RetryFilter;

impl HostFilter for RetryFilter {
    fn name(&self) -> &'static str {
        "RetryFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        let tried = ctx
            .properties
            .retry
            .as_ref()
            .is_some_and(|r| r.hosts.iter().any(|h| h == host.host()));
        FilterVerdict::check(!tried, || "host already attempted".to_string())
    }
}

pub struct AvailabilityZoneFilter;

impl HostFilter for AvailabilityZoneFilter {
    fn name(&self) -> &'static str {
        "AvailabilityZoneFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        match &ctx.properties.availability_zone {
            Some(wanted) => FilterVerdict::check(host.availability_zone() == Some(wanted.as_str()), || {
                format!(
                    "availability zone {} != {wanted}",
                    host.availability_zone().unwrap_or("<none>")
                )
            }),
            None => FilterVerdict::Accept,
        }
    }
}

/// Only fresh, enabled compute hosts.
pub struct ComputeFilter {
    pub freshness_secs: u64,
}

impl HostFilter for ComputeFilter {
    fn name(&self) -> &'static str {
        "ComputeFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        if host.service() != COMPUTE_SERVICE {
            return FilterVerdict::Reject(format!("service {} is not compute", host.service()));
        }
        if host.is_disabled() {
            return FilterVerdict::Reject("service disabled".to_string());
        }
        FilterVerdict::check(host.is_fresh(ctx.now, self.freshness_secs), || {
            format!(
                "last report {}s ago exceeds {}s",
                ctx.now.saturating_sub(host.updated_at),
                self.freshness_secs
            )
        })
    }
}

/// vCPU capacity with overcommit.
pub struct CoreFilter {
    pub allocation_ratio: f64,
}

impl HostFilter for CoreFilter {
    fn name(&self) -> &'static str {
        "CoreFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        // Hosts that do not report vCPUs are not judged on them.
        if host.total.vcpus == 0 {
            return FilterVerdict::Accept;
        }
        let limit = f64::from(host.total.vcpus) * self.allocation_ratio;
        let usable = limit - f64::from(host.used.vcpus);
        let requested = f64::from(ctx.resources.vcpus);
        FilterVerdict::check(usable >= requested, || {
            format!("{usable} usable vcpus < {requested} requested")
        })
    }
}

/// RAM capacity with overcommit and a per-host reservation.
pub struct RamFilter {
    pub allocation_ratio: f64,
    pub reserved_mb: u64,
}

impl HostFilter for RamFilter {
    fn name(&self) -> &'static str {
        "RamFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        let limit = host.total.memory_mb as f64 * self.allocation_ratio;
        let usable = limit - host.used.memory_mb as f64 - self.reserved_mb as f64;
        let requested = ctx.resources.memory_mb as f64;
        FilterVerdict::check(usable >= requested, || {
            format!("{usable} MB usable ram < {requested} MB requested")
        })
    }
}

/// Local disk capacity with overcommit and a per-host reservation.
///
/// Live migration over shared storage, or with disk overcommit allowed,
/// does not consume destination disk and is accepted.
pub struct DiskFilter {
    pub allocation_ratio: f64,
    pub reserved_gb: u64,
}

impl HostFilter for DiskFilter {
    fn name(&self) -> &'static str {
        "DiskFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        if let Some(m) = ctx.migration {
            if !m.block_migration || m.disk_over_commit {
                return FilterVerdict::Accept;
            }
        }
        let limit = host.total.disk_gb as f64 * self.allocation_ratio;
        let usable = limit - host.used.disk_gb as f64 - self.reserved_gb as f64;
        let requested = ctx.resources.disk_gb as f64;
        FilterVerdict::check(usable >= requested, || {
            format!("{usable} GB usable disk < {requested} GB requested")
        })
    }
}

/// Required image properties must match host capabilities (ASCII
/// case-insensitive).
pub struct ImagePropertiesFilter;

impl HostFilter for ImagePropertiesFilter {
    fn name(&self) -> &'static str {
        "ImagePropertiesFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        for (key, wanted) in &ctx.properties.image_properties {
            match host.capability_text(key) {
                Some(actual) if actual.eq_ignore_ascii_case(wanted) => {}
                actual => {
                    return FilterVerdict::Reject(format!(
                        "image property {key}={wanted}, host has {}",
                        actual.as_deref().unwrap_or("<none>")
                    ));
                }
            }
        }
        FilterVerdict::Accept
    }
}

pub struct DifferentHostFilter;

impl HostFilter for DifferentHostFilter {
    fn name(&self) -> &'static str {
        "DifferentHostFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        FilterVerdict::check(!ctx.properties.different_hosts.contains(host.host()), || {
            "host runs a workload this one must avoid".to_string()
        })
    }
}

pub struct SameHostFilter;

impl HostFilter for SameHostFilter {
    fn name(&self) -> &'static str {
        "SameHostFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        match &ctx.properties.same_hosts {
            Some(hosts) => FilterVerdict::check(hosts.contains(host.host()), || {
                "host runs none of the requested workloads".to_string()
            }),
            None => FilterVerdict::Accept,
        }
    }
}

/// Keep hosts whose IP lies in `build_near_host_ip` + `cidr` (default `/24`).
pub struct SimpleCidrAffinityFilter;

impl HostFilter for SimpleCidrAffinityFilter {
    fn name(&self) -> &'static str {
        "SimpleCidrAffinityFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        let hints = &ctx.properties.hints;
        let Some(near) = hints.build_near_host_ip.as_deref() else {
            return FilterVerdict::Accept;
        };
        let cidr = hints.cidr.as_deref().unwrap_or("/24");
        let Some((network, prefix)) = parse_network(near, cidr) else {
            return FilterVerdict::Reject(format!("invalid affinity network {near}{cidr}"));
        };
        match host.host_ip() {
            Some(ip) => FilterVerdict::check(in_network(ip, network, prefix), || {
                format!("host ip {ip} outside {near}{cidr}")
            }),
            None => FilterVerdict::Reject("host reports no ip".to_string()),
        }
    }
}

/// Reject hosts already running a member of the request's anti-affinity group.
pub struct GroupAntiAffinityFilter;

impl HostFilter for GroupAntiAffinityFilter {
    fn name(&self) -> &'static str {
        "GroupAntiAffinityFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        match &ctx.properties.group {
            Some(group) => FilterVerdict::check(!group.hosts.contains(host.host()), || {
                format!("host already runs a member of group {}", group.name)
            }),
            None => FilterVerdict::Accept,
        }
    }
}

pub struct IgnoreHostsFilter;

impl HostFilter for IgnoreHostsFilter {
    fn name(&self) -> &'static str {
        "IgnoreHostsFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        FilterVerdict::check(!ctx.properties.ignore_hosts.contains(host.host()), || {
            "host explicitly ignored".to_string()
        })
    }
}

/// Live-migration compatibility with the source host. Accepts everything
/// outside a migration.
pub struct MigrationCompatibilityFilter;

impl HostFilter for MigrationCompatibilityFilter {
    fn name(&self) -> &'static str {
        "MigrationCompatibilityFilter"
    }

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict {
        let Some(m) = ctx.migration else {
            return FilterVerdict::Accept;
        };
        if host.host() == m.source.host() {
            return FilterVerdict::Reject("host is the migration source".to_string());
        }
        match check_compatibility(m.source, host, m.block_migration) {
            Ok(()) => FilterVerdict::Accept,
            Err(e) => FilterVerdict::Reject(e.to_string()),
        }
    }
}

fn parse_network(addr: &str, cidr: &str) -> Option<(IpAddr, u8)> {
    let ip: IpAddr = addr.trim().parse().ok()?;
    let prefix: u8 = cidr.trim().trim_start_matches('/').parse().ok()?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((ip, prefix))
}

fn in_network(addr: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (addr, network) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(a) & mask == u32::from(n) & mask
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(a) & mask == u128::from(n) & mask
        }
        _ => false,
    }
}
