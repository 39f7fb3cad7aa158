//! Placement engine: batch host selection and live-migration targets.
//!
//! Every call works on a private snapshot of the [`CapabilityStore`]. For a
//! batch, each pick is consumed on that snapshot before the next workload
//! is filtered, so one call never over-commits a host. The snapshot is
//! dropped at the end of the call; the store only learns real usage from
//! the next capability report.

use std::sync::Arc;

use tracing::{debug, info};

use crate::capability::{CapabilityStore, epoch_secs};
use crate::config::PlacementConfig;
use crate::error::{PlacementError, PlacementResult};
use crate::filter::FilterPipeline;
use crate::host_state::HostState;
use crate::migration::{check_compatibility, live_compute_host};
use crate::registry::{build_filters, build_weighers};
use crate::request::{
    FilterProperties, MigrationContext, MigrationRequest, PlacementContext, PlacementRequest,
};
use crate::weigher::WeigherPipeline;

pub struct PlacementEngine {
    store: Arc<CapabilityStore>,
    filters: FilterPipeline,
    migration_filters: FilterPipeline,
    weighers: WeigherPipeline,
    freshness_secs: u64,
}

impl PlacementEngine {
    pub fn new(
        store: Arc<CapabilityStore>,
        filters: FilterPipeline,
        migration_filters: FilterPipeline,
        weighers: WeigherPipeline,
        freshness_secs: u64,
    ) -> Self {
        Self {
            store,
            filters,
            migration_filters,
            weighers,
            freshness_secs,
        }
    }

    /// Build an engine with the filters and weighers named in `config`.
    pub fn from_config(store: Arc<CapabilityStore>, config: &PlacementConfig) -> PlacementResult<Self> {
        let filters = build_filters(&config.filters, config)?;
        let migration_filters = build_filters(&config.migration_filters, config)?;
        let weighers = build_weighers(&config.weighers)?;
        info!(
            filters = ?filters.names(),
            migration_filters = ?migration_filters.names(),
            weighers = ?weighers.names(),
            "placement engine configured"
        );
        Ok(Self::new(
            store,
            filters,
            migration_filters,
            weighers,
            config.host_freshness_secs,
        ))
    }

    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    /// Choose one host per workload in the request, in request order.
    pub fn select_hosts(&self, request: &PlacementRequest) -> PlacementResult<Vec<HostState>> {
        self.select_hosts_at(request, epoch_secs())
    }

    /// [`select_hosts`](Self::select_hosts) evaluated at a fixed time.
    ///
    /// Fails with `NoValidHost` as soon as any workload in the batch has no
    /// surviving host; no partial selection is returned. Each returned
    /// state reflects the consumption simulated up to and including that
    /// pick.
    pub fn select_hosts_at(&self, request: &PlacementRequest, now: u64) -> PlacementResult<Vec<HostState>> {
        let mut hosts = self.store.snapshot();
        let mut properties = request.constraints.clone();
        let count = request.instance_count();
        let mut selected = Vec::with_capacity(count);

        for index in 0..count {
            let ctx = PlacementContext::new(&request.resources, &properties, now);
            let outcome = self.filters.filter_with_reasons(&hosts, &ctx);
            if outcome.passed.is_empty() {
                let reason = outcome.summary();
                info!(index, count, %reason, "no valid host for workload");
                return Err(PlacementError::no_valid_host(format!(
                    "workload {} of {count}: {reason}",
                    index + 1
                )));
            }

            let ranked = self.weighers.weigh(&outcome.passed, &ctx);
            let Some(best) = ranked.first() else {
                return Err(PlacementError::Internal("weighing dropped every host".to_string()));
            };
            let key = best.host.key.clone();
            debug!(index, host = %key, weight = best.weight, candidates = ranked.len(), "host chosen");

            let Some(chosen) = hosts.iter_mut().find(|h| h.key == key) else {
                return Err(PlacementError::Internal(format!("chosen host {key} left the snapshot")));
            };
            chosen.consume(&request.resources);
            if let Some(group) = properties.group.as_mut() {
                group.hosts.insert(chosen.host().to_string());
            }
            selected.push(chosen.clone());
        }

        info!(
            count,
            hosts = ?selected.iter().map(|h| h.host()).collect::<Vec<_>>(),
            "placement selected"
        );
        Ok(selected)
    }

    /// Choose (or validate) the destination of a live migration.
    pub fn select_destination(&self, request: &MigrationRequest) -> PlacementResult<HostState> {
        self.select_destination_at(request, epoch_secs())
    }

    pub fn select_destination_at(&self, request: &MigrationRequest, now: u64) -> PlacementResult<HostState> {
        if request.destination.as_deref() == Some(request.source_host.as_str()) {
            return Err(PlacementError::UnableToMigrateToSelf {
                workload_id: request.workload_id.clone(),
                host: request.source_host.clone(),
            });
        }

        let hosts = self.store.snapshot();
        let source = live_compute_host(&hosts, &request.source_host, now, self.freshness_secs)?;
        let properties = FilterProperties::default();
        let mut ctx = PlacementContext::new(&request.resources, &properties, now);
        ctx.migration = Some(MigrationContext {
            source,
            block_migration: request.block_migration,
            disk_over_commit: request.disk_over_commit,
        });

        let chosen = match request.destination.as_deref() {
            Some(name) => {
                let destination = live_compute_host(&hosts, name, now, self.freshness_secs)?;
                check_compatibility(source, destination, request.block_migration)?;
                let outcome = self
                    .migration_filters
                    .filter_with_reasons(std::slice::from_ref(destination), &ctx);
                match outcome.passed.first() {
                    Some(host) => (*host).clone(),
                    None => {
                        return Err(PlacementError::no_valid_host(format!(
                            "destination {name}: {}",
                            outcome.summary()
                        )));
                    }
                }
            }
            None => {
                let candidates: Vec<HostState> = hosts
                    .iter()
                    .filter(|h| h.host() != source.host())
                    .cloned()
                    .collect();
                let outcome = self.migration_filters.filter_with_reasons(&candidates, &ctx);
                let ranked = self.weighers.weigh(&outcome.passed, &ctx);
                match ranked.first() {
                    Some(best) => best.host.clone(),
                    None => {
                        return Err(PlacementError::no_valid_host(format!(
                            "no migration target for {}: {}",
                            request.workload_id,
                            outcome.summary()
                        )));
                    }
                }
            }
        };

        info!(
            workload_id = %request.workload_id,
            source = %request.source_host,
            destination = chosen.host(),
            "migration destination selected"
        );
        Ok(chosen)
    }
}
