//! Live-migration compatibility checks between a source and a destination.

use crate::error::{PlacementError, PlacementResult};
use crate::host_state::{COMPUTE_SERVICE, HostState};

/// Check that `destination` can receive a live migration from `source`.
///
/// Checks run in a fixed order: hypervisor type, hypervisor version, then
/// storage layout. Block migration copies disks and so must not target a
/// host on the same storage pool; plain live migration requires it.
pub fn check_compatibility(
    source: &HostState,
    destination: &HostState,
    block_migration: bool,
) -> PlacementResult<()> {
    let source_type = source.hypervisor_type().unwrap_or_default();
    let destination_type = destination.hypervisor_type().unwrap_or_default();
    if source_type != destination_type {
        return Err(PlacementError::InvalidHypervisorType {
            destination: destination.host().to_string(),
            source_type: source_type.to_string(),
            destination_type: destination_type.to_string(),
        });
    }

    if let Some(source_version) = source.hypervisor_version() {
        let destination_version = destination.hypervisor_version();
        if destination_version.as_ref().is_none_or(|v| *v < source_version) {
            return Err(PlacementError::DestinationHypervisorTooOld {
                destination: destination.host().to_string(),
                source_version: source_version.to_string(),
                destination_version: destination_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }
    }

    let shared = matches!(
        (source.shared_storage(), destination.shared_storage()),
        (Some(a), Some(b)) if a == b
    );
    if block_migration && shared {
        return Err(PlacementError::InvalidLocalStorage {
            source_host: source.host().to_string(),
            destination: destination.host().to_string(),
        });
    }
    if !block_migration && !shared {
        return Err(PlacementError::InvalidSharedStorage {
            source_host: source.host().to_string(),
            destination: destination.host().to_string(),
        });
    }

    Ok(())
}

/// Find the live compute entry for `host` in a snapshot.
pub fn live_compute_host<'h>(
    hosts: &'h [HostState],
    host: &str,
    now: u64,
    freshness_secs: u64,
) -> PlacementResult<&'h HostState> {
    hosts
        .iter()
        .find(|h| h.service() == COMPUTE_SERVICE && h.host() == host)
        .filter(|h| h.is_fresh(now, freshness_secs) && !h.is_disabled())
        .ok_or_else(|| PlacementError::ComputeServiceUnavailable {
            host: host.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host_state::{Capabilities, HostKey};
    use serde_json::{Value, json};

    fn host(name: &str, caps: Value) -> HostState {
        let caps: Capabilities = caps.as_object().cloned().unwrap();
        HostState::from_capabilities(HostKey::new("compute", name), caps, 100)
    }

    fn kind(res: PlacementResult<()>) -> Option<ErrorKind> {
        res.err().map(|e| e.kind())
    }

    #[test]
    fn compatible_shared_storage_passes() {
        let src = host("a", json!({"hypervisor_type": "kvm", "hypervisor_version": 1_002_000, "shared_storage": "p1"}));
        let dst = host("b", json!({"hypervisor_type": "kvm", "hypervisor_version": 1_003_000, "shared_storage": "p1"}));
        assert!(check_compatibility(&src, &dst, false).is_ok());
    }

    #[test]
    fn hypervisor_type_mismatch() {
        let src = host("a", json!({"hypervisor_type": "kvm"}));
        let dst = host("b", json!({"hypervisor_type": "xen"}));
        assert_eq!(
            kind(check_compatibility(&src, &dst, true)),
            Some(ErrorKind::InvalidHypervisorType)
        );
    }

    #[test]
    fn older_destination_rejected() {
        let src = host("a", json!({"hypervisor_type": "kvm", "hypervisor_version": "2.1"}));
        let dst = host("b", json!({"hypervisor_type": "kvm", "hypervisor_version": "2.0.9"}));
        assert_eq!(
            kind(check_compatibility(&src, &dst, true)),
            Some(ErrorKind::DestinationHypervisorTooOld)
        );

        let unknown = host("c", json!({"hypervisor_type": "kvm"}));
        assert_eq!(
            kind(check_compatibility(&src, &unknown, true)),
            Some(ErrorKind::DestinationHypervisorTooOld)
        );
    }

    #[test]
    fn storage_layout_rules() {
        let src = host("a", json!({"shared_storage": "p1"}));
        let same_pool = host("b", json!({"shared_storage": "p1"}));
        let other_pool = host("c", json!({"shared_storage": "p2"}));

        assert_eq!(
            kind(check_compatibility(&src, &same_pool, true)),
            Some(ErrorKind::InvalidLocalStorage)
        );
        assert_eq!(
            kind(check_compatibility(&src, &other_pool, false)),
            Some(ErrorKind::InvalidSharedStorage)
        );
        assert!(check_compatibility(&src, &other_pool, true).is_ok());
    }

    #[test]
    fn live_compute_host_lookup() {
        let mut hosts = vec![host("a", json!({})), host("b", json!({"disabled": true}))];
        hosts.push(HostState::from_capabilities(
            HostKey::new("volume", "c"),
            Capabilities::new(),
            100,
        ));

        assert!(live_compute_host(&hosts, "a", 120, 60).is_ok());
        assert!(live_compute_host(&hosts, "a", 200, 60).is_err());
        assert!(live_compute_host(&hosts, "b", 120, 60).is_err());
        assert!(live_compute_host(&hosts, "c", 120, 60).is_err());
        assert!(live_compute_host(&hosts, "zzz", 120, 60).is_err());
    }
}
