//! Upstream registry: route lookup from request to upstream service.
//!
//! # Responsibilities
//! - Store compiled upstreams and their predicates
//! - Look up the upstream for a request
//! - Return matched upstream or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) predicate scan in configuration order (acceptable for typical route counts)
//! - Explicit NotFound rather than silent default

use std::sync::Arc;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::{HealthCheckConfig, ProcessConfig, UpstreamConfig};
use crate::config::validation::ValidationError;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher, RequestTarget};

/// A logical upstream service, immutable after load.
#[derive(Debug, Clone)]
pub struct UpstreamService {
    pub name: String,
    pub authority: Authority,
    pub health_check: HealthCheckConfig,
    pub process: Option<ProcessConfig>,
}

impl UpstreamService {
    /// Build from config, failing on an unparseable address.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ValidationError> {
        let authority = config
            .address
            .parse::<Authority>()
            .map_err(|_| ValidationError::InvalidAddress {
                name: config.name.clone(),
                address: config.address.clone(),
            })?;
        Ok(Self {
            name: config.name.clone(),
            authority,
            health_check: config.health_check.clone(),
            process: config.process.clone(),
        })
    }

    /// Whether the proxy launches and relaunches this service itself.
    pub fn is_managed(&self) -> bool {
        self.process.is_some()
    }
}

/// No predicate matched the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no route for host {host:?} path '{path}'")]
    NotFound { host: Option<String>, path: String },
}

#[derive(Debug)]
struct CompiledRoute {
    matcher: AndMatcher,
    service: Arc<UpstreamService>,
}

/// Static map from requests to upstream services.
#[derive(Debug)]
pub struct UpstreamRegistry {
    routes: Vec<CompiledRoute>,
    services: Vec<Arc<UpstreamService>>,
}

impl UpstreamRegistry {
    /// Compile the registry from upstream configuration.
    ///
    /// Predicates keep configuration order: upstreams first, then each
    /// upstream's routes.
    pub fn from_config(upstreams: &[UpstreamConfig]) -> Result<Self, ValidationError> {
        let mut routes = Vec::new();
        let mut services = Vec::with_capacity(upstreams.len());

        for config in upstreams {
            let service = Arc::new(UpstreamService::from_config(config)?);
            for predicate in &config.routes {
                let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
                if let Some(host) = &predicate.host {
                    matchers.push(Box::new(HostMatcher::new(host.clone())));
                }
                if let Some(prefix) = &predicate.path_prefix {
                    matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
                }
                routes.push(CompiledRoute {
                    matcher: AndMatcher::new(matchers),
                    service: service.clone(),
                });
            }
            services.push(service);
        }

        tracing::debug!(
            upstreams = services.len(),
            routes = routes.len(),
            "Upstream registry compiled"
        );

        Ok(Self { routes, services })
    }

    /// Find the upstream for a request. First matching predicate wins.
    pub fn resolve(&self, target: &RequestTarget<'_>) -> Result<Arc<UpstreamService>, RoutingError> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(target))
            .map(|route| route.service.clone())
            .ok_or_else(|| RoutingError::NotFound {
                host: target.host.map(str::to_string),
                path: target.path.to_string(),
            })
    }

    /// All registered services, in configuration order.
    pub fn services(&self) -> &[Arc<UpstreamService>] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&Arc<UpstreamService>> {
        self.services.iter().find(|s| s.name == name)
    }
}
