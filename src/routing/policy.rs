//! Route policy lookup.
//!
//! # Responsibilities
//! - Compile `[[routes]]` into matchers with resolved middleware options
//! - Look up the options for a request path
//! - Swap the whole table atomically on config reload
//!
//! # Design Decisions
//! - Highest priority wins; ties go to the longest prefix
//! - Unmatched paths get the resilience defaults, without caching or timeout
//! - Readers never block: the table is behind `ArcSwap`

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::config::{ResilienceConfig, RoutePolicyConfig};
use crate::resilience::presets::MiddlewareOptions;
use crate::routing::matcher::PathPrefixMatcher;

#[derive(Debug)]
struct CompiledPolicy {
    matcher: PathPrefixMatcher,
    priority: u32,
    options: Arc<MiddlewareOptions>,
}

fn sort_policies(policies: &mut [CompiledPolicy]) {
    policies.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.matcher.specificity().cmp(&a.matcher.specificity()))
    });
}

/// Immutable, compiled policy table.
#[derive(Debug)]
pub struct PolicyTable {
    policies: Vec<CompiledPolicy>,
    default: Arc<MiddlewareOptions>,
}

impl PolicyTable {
    pub fn from_config(routes: &[RoutePolicyConfig], defaults: &ResilienceConfig) -> Self {
        let mut policies: Vec<CompiledPolicy> = routes
            .iter()
            .map(|route| CompiledPolicy {
                matcher: PathPrefixMatcher::new(route.path_prefix.clone()),
                priority: route.priority,
                options: Arc::new(MiddlewareOptions::from_policy(route)),
            })
            .collect();

        sort_policies(&mut policies);

        Self {
            policies,
            default: Arc::new(MiddlewareOptions::from_defaults(
                defaults.circuit_breaker,
                defaults.retry,
            )),
        }
    }

    /// Replace the options of the policy with exactly `prefix`, or append one.
    pub fn with_options(mut self, prefix: &str, options: MiddlewareOptions) -> Self {
        let matcher = PathPrefixMatcher::new(prefix);
        let options = Arc::new(options);
        match self
            .policies
            .iter_mut()
            .find(|p| p.matcher.prefix() == matcher.prefix())
        {
            Some(existing) => existing.options = options,
            None => self.policies.push(CompiledPolicy {
                matcher,
                priority: 0,
                options,
            }),
        }
        sort_policies(&mut self.policies);
        self
    }

    pub fn resolve(&self, path: &str) -> Arc<MiddlewareOptions> {
        self.policies
            .iter()
            .find(|p| p.matcher.matches(path))
            .map(|p| p.options.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Hot-swappable handle to the current [`PolicyTable`].
#[derive(Debug)]
pub struct RoutePolicies {
    table: ArcSwap<PolicyTable>,
}

impl RoutePolicies {
    pub fn new(table: PolicyTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    pub fn resolve(&self, path: &str) -> Arc<MiddlewareOptions> {
        self.table.load().resolve(path)
    }

    pub fn replace(&self, table: PolicyTable) {
        tracing::info!(routes = table.len(), "Route policies replaced");
        self.table.store(Arc::new(table));
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }
}
