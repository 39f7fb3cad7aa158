//! Host weighing: ranks eligible hosts for a request.
//!
//! Each weigher scores a host; the pipeline sums `multiplier * score` over
//! all weighers. A negative multiplier inverts a weigher's preference.
//! Ranking is by combined weight descending, ties broken by host key
//! ascending, so identical inputs always rank identically.

use std::cmp::Ordering;

use crate::host_state::HostState;
use crate::request::PlacementContext;

/// A scoring function used to rank eligible hosts.
pub trait HostWeigher: Send + Sync {
    /// Registry name of the weigher.
    fn name(&self) -> &'static str;

    /// Raw score for `host`; higher is preferred before the multiplier.
    fn weigh(&self, host: &HostState, ctx: &PlacementContext<'_>) -> f64;
}

/// A host with its combined weight.
#[derive(Debug, Clone)]
pub struct WeighedHost<'h> {
    pub host: &'h HostState,
    pub weight: f64,
}

/// Ordered weighers with their multipliers.
#[derive(Default)]
pub struct WeigherPipeline {
    weighers: Vec<(Box<dyn HostWeigher>, f64)>,
}

impl WeigherPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, weigher: Box<dyn HostWeigher>, multiplier: f64) -> Self {
        self.push(weigher, multiplier);
        self
    }

    pub fn push(&mut self, weigher: Box<dyn HostWeigher>, multiplier: f64) {
        self.weighers.push((weigher, multiplier));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.weighers.iter().map(|(w, _)| w.name()).collect()
    }

    /// Combined weight of one host.
    pub fn weight_of(&self, host: &HostState, ctx: &PlacementContext<'_>) -> f64 {
        let total: f64 = self
            .weighers
            .iter()
            .map(|(w, multiplier)| multiplier * w.weigh(host, ctx))
            .sum();
        // -0.0 and NaN would otherwise sort apart from 0.0.
        if total == 0.0 || total.is_nan() { 0.0 } else { total }
    }

    /// Rank `hosts`, best first.
    pub fn weigh<'h>(&self, hosts: &[&'h HostState], ctx: &PlacementContext<'_>) -> Vec<WeighedHost<'h>> {
        let mut ranked: Vec<WeighedHost<'h>> = hosts
            .iter()
            .map(|&host| WeighedHost {
                host,
                weight: self.weight_of(host, ctx),
            })
            .collect();
        ranked.sort_by(rank_order);
        ranked
    }
}

fn rank_order(a: &WeighedHost<'_>, b: &WeighedHost<'_>) -> Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then_with(|| a.host.key.cmp(&b.host.key))
}

/// Prefers hosts with more free RAM.
pub struct RamWeigher;

impl HostWeigher for RamWeigher {
    fn name(&self) -> &'static str {
        "RamWeigher"
    }

    fn weigh(&self, host: &HostState, _ctx: &PlacementContext<'_>) -> f64 {
        host.total.memory_mb as f64 - host.used.memory_mb as f64
    }
}

/// Prefers hosts with more free vCPUs.
pub struct CpuWeigher;

impl HostWeigher for CpuWeigher {
    fn name(&self) -> &'static str {
        "CpuWeigher"
    }

    fn weigh(&self, host: &HostState, _ctx: &PlacementContext<'_>) -> f64 {
        f64::from(host.total.vcpus) - f64::from(host.used.vcpus)
    }
}

/// Prefers hosts with more free local disk.
pub struct DiskWeigher;

impl HostWeigher for DiskWeigher {
    fn name(&self) -> &'static str {
        "DiskWeigher"
    }

    fn weigh(&self, host: &HostState, _ctx: &PlacementContext<'_>) -> f64 {
        host.total.disk_gb as f64 - host.used.disk_gb as f64
    }
}

/// Scores by instance count. Use a negative multiplier to spread load.
pub struct InstanceCountWeigher;

impl HostWeigher for InstanceCountWeigher {
    fn name(&self) -> &'static str {
        "InstanceCountWeigher"
    }

    fn weigh(&self, host: &HostState, _ctx: &PlacementContext<'_>) -> f64 {
        f64::from(host.num_instances)
    }
}
