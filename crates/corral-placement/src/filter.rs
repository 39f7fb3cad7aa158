//! Host filter pipeline.
//!
//! A host survives only if every filter accepts it. Filters run in the
//! configured order and evaluation stops at the first rejection for a host;
//! since filters are pure predicates, the result equals evaluating all of
//! them.

use tracing::debug;

use crate::host_state::{HostKey, HostState};
use crate::request::PlacementContext;

/// Outcome of one filter for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    /// Rejected, with a human-readable reason.
    Reject(String),
}

impl FilterVerdict {
    /// Accept when `ok`, otherwise reject with the lazily built reason.
    pub fn check(ok: bool, reason: impl FnOnce() -> String) -> Self {
        if ok {
            FilterVerdict::Accept
        } else {
            FilterVerdict::Reject(reason())
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, FilterVerdict::Accept)
    }
}

/// A predicate eliminating hosts that cannot satisfy a request.
pub trait HostFilter: Send + Sync {
    /// Registry name of the filter.
    fn name(&self) -> &'static str;

    fn host_passes(&self, host: &HostState, ctx: &PlacementContext<'_>) -> FilterVerdict;
}

/// Why a host was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub host: HostKey,
    pub filter: &'static str,
    pub reason: String,
}

/// Survivors plus the reason each other host was rejected.
#[derive(Debug)]
pub struct FilterOutcome<'h> {
    pub passed: Vec<&'h HostState>,
    pub rejected: Vec<Rejection>,
}

impl FilterOutcome<'_> {
    /// Short diagnostic: rejected host count per filter.
    pub fn summary(&self) -> String {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for r in &self.rejected {
            match counts.iter_mut().find(|(name, _)| *name == r.filter) {
                Some((_, n)) => *n += 1,
                None => counts.push((r.filter, 1)),
            }
        }
        if counts.is_empty() {
            return "no hosts known".to_string();
        }
        counts
            .iter()
            .map(|(name, n)| format!("{name} rejected {n}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Ordered chain of filters.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn HostFilter>>,
}

impl FilterPipeline {
    pub fn new(filters: Vec<Box<dyn HostFilter>>) -> Self {
        Self { filters }
    }

    /// Append a filter to the end of the chain.
    pub fn push(&mut self, filter: Box<dyn HostFilter>) {
        self.filters.push(filter);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Hosts accepted by every filter, in input order.
    pub fn filter<'h>(&self, hosts: &'h [HostState], ctx: &PlacementContext<'_>) -> Vec<&'h HostState> {
        self.filter_with_reasons(hosts, ctx).passed
    }

    /// Like [`filter`](Self::filter), also reporting the first rejecting
    /// filter for every dropped host.
    pub fn filter_with_reasons<'h>(
        &self,
        hosts: &'h [HostState],
        ctx: &PlacementContext<'_>,
    ) -> FilterOutcome<'h> {
        let mut passed = Vec::with_capacity(hosts.len());
        let mut rejected = Vec::new();

        'hosts: for host in hosts {
            for filter in &self.filters {
                if let FilterVerdict::Reject(reason) = filter.host_passes(host, ctx) {
                    debug!(host = %host.key, filter = filter.name(), %reason, "host rejected");
                    rejected.push(Rejection {
                        host: host.key.clone(),
                        filter: filter.name(),
                        reason,
                    });
                    continue 'hosts;
                }
            }
            passed.push(host);
        }

        FilterOutcome { passed, rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_state::{Capabilities, Resources};
    use crate::request::FilterProperties;

    struct MinVcpus(u32);

    impl HostFilter for MinVcpus {
        fn name(&self) -> &'static str {
            "MinVcpus"
        }

        fn host_passes(&self, host: &HostState, _ctx: &PlacementContext<'_>) -> FilterVerdict {
            FilterVerdict::check(host.free().vcpus >= self.0, || {
                format!("{} free vcpus", host.free().vcpus)
            })
        }
    }

    struct RejectAll;

    impl HostFilter for RejectAll {
        fn name(&self) -> &'static str {
            "RejectAll"
        }

        fn host_passes(&self, _host: &HostState, _ctx: &PlacementContext<'_>) -> FilterVerdict {
            FilterVerdict::Reject("nope".to_string())
        }
    }

    fn make_host(name: &str, vcpus: u32) -> HostState {
        let mut state =
            HostState::from_capabilities(HostKey::new("compute", name), Capabilities::new(), 0);
        state.total.vcpus = vcpus;
        state
    }

    #[test]
    fn empty_pipeline_passes_everything() {
        let hosts = vec![make_host("a", 1), make_host("b", 2)];
        let props = FilterProperties::default();
        let res = Resources::default();
        let ctx = PlacementContext::new(&res, &props, 0);

        assert_eq!(FilterPipeline::default().filter(&hosts, &ctx).len(), 2);
    }

    #[test]
    fn adding_a_filter_never_grows_the_result() {
        let hosts: Vec<HostState> = (0..8).map(|i| make_host(&format!("h{i}"), i)).collect();
        let props = FilterProperties::default();
        let res = Resources::default();
        let ctx = PlacementContext::new(&res, &props, 0);

        let mut pipeline = FilterPipeline::new(vec![Box::new(MinVcpus(2))]);
        let before = pipeline.filter(&hosts, &ctx).len();
        pipeline.push(Box::new(MinVcpus(5)));
        let after = pipeline.filter(&hosts, &ctx).len();

        assert_eq!(before, 6);
        assert_eq!(after, 3);
        assert!(after <= before);
    }

    #[test]
    fn reasons_name_first_rejecting_filter() {
        let hosts = vec![make_host("a", 1), make_host("b", 4)];
        let props = FilterProperties::default();
        let res = Resources::default();
        let ctx = PlacementContext::new(&res, &props, 0);

        let pipeline = FilterPipeline::new(vec![Box::new(MinVcpus(2)), Box::new(RejectAll)]);
        let outcome = pipeline.filter_with_reasons(&hosts, &ctx);

        assert!(outcome.passed.is_empty());
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected[0].filter, "MinVcpus");
        assert_eq!(outcome.rejected[0].reason, "1 free vcpus");
        assert_eq!(outcome.rejected[1].filter, "RejectAll");
        assert_eq!(outcome.summary(), "MinVcpus rejected 1, RejectAll rejected 1");
        assert_eq!(pipeline.names(), vec!["MinVcpus", "RejectAll"]);
    }

    #[test]
    fn summary_for_empty_fleet() {
        let outcome = FilterOutcome {
            passed: Vec::new(),
            rejected: Vec::new(),
        };
        assert_eq!(outcome.summary(), "no hosts known");
    }
}
