//! Rule-based egress routing.
//!
//! A router owns an ordered rule table and a fallback egress. Rules match
//! on the destination domain only: IP-addressed destinations always fall
//! through to the fallback. First match wins; the table is immutable
//! after construction.

use crate::config::RouteConfig;
use crate::error::ProxyError;
use crate::inbound::Metadata;
use crate::outbound::{Outbound, PROXY};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A single routing rule
#[derive(Debug)]
struct Rule {
    domains: HashSet<String>,
    suffixes: Vec<String>,
    outbound_name: String,
    outbound: Arc<dyn Outbound>,
}

impl Rule {
    fn matches(&self, metadata: &Metadata) -> bool {
        let Some(domain) = metadata.dest.domain_name() else {
            return false;
        };
        if self.domains.contains(domain) {
            return true;
        }
        self.suffixes.iter().any(|suffix| domain.ends_with(suffix))
    }
}

/// Maps request metadata to an egress adapter
#[derive(Debug)]
pub struct Router {
    rules: Vec<Rule>,
    fallback_name: String,
    fallback: Arc<dyn Outbound>,
}

impl Router {
    /// Build a router from configuration.
    ///
    /// Fails if any rule, or the fallback, names an egress that is not in
    /// `outbounds`. The fallback name defaults to `"proxy"` when the
    /// config leaves it unset.
    pub fn new(
        route: &RouteConfig,
        outbounds: &HashMap<String, Arc<dyn Outbound>>,
    ) -> Result<Self, ProxyError> {
        let mut rules = Vec::with_capacity(route.rules.len());
        for rule in &route.rules {
            let outbound = outbounds.get(&rule.outbound).ok_or_else(|| {
                ProxyError::Config(format!(
                    "route rule references undefined outbound: {}",
                    rule.outbound
                ))
            })?;

            rules.push(Rule {
                domains: rule.domain.iter().cloned().collect(),
                suffixes: rule.domain_suffix.clone(),
                outbound_name: rule.outbound.clone(),
                outbound: Arc::clone(outbound),
            });
        }

        let fallback_name = route.final_outbound.as_deref().unwrap_or(PROXY);
        let fallback = outbounds.get(fallback_name).ok_or_else(|| {
            ProxyError::Config(format!(
                "route final references undefined outbound: {}",
                fallback_name
            ))
        })?;

        Ok(Router {
            rules,
            fallback_name: fallback_name.to_string(),
            fallback: Arc::clone(fallback),
        })
    }

    /// Select the egress for a request. Deterministic: depends only on
    /// the metadata and the frozen rule table.
    pub fn route(&self, metadata: &Metadata) -> Arc<dyn Outbound> {
        for rule in &self.rules {
            if rule.matches(metadata) {
                debug!("routing {} via {}", metadata.dest, rule.outbound_name);
                return Arc::clone(&rule.outbound);
            }
        }
        debug!("routing {} via {} (final)", metadata.dest, self.fallback_name);
        Arc::clone(&self.fallback)
    }
}
