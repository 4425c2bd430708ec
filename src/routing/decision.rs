//! Per-request routing decision.

use std::sync::Arc;

use crate::health::{HealthBoard, Verdict};
use crate::routing::matcher::RequestTarget;
use crate::routing::registry::{RoutingError, UpstreamRegistry, UpstreamService};

/// Where a request goes and whether it may be forwarded.
///
/// Built fresh for every request and never cached.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub service: Arc<UpstreamService>,
    /// Verdict snapshot this request was judged against.
    pub verdict: Verdict,
    pub eligible: bool,
}

/// Resolve the upstream for a request and read its verdict once.
pub fn decide(
    registry: &UpstreamRegistry,
    health: &HealthBoard,
    target: &RequestTarget<'_>,
) -> Result<RouteDecision, RoutingError> {
    let service = registry.resolve(target)?;
    let verdict = health.verdict(&service.name);
    Ok(RouteDecision {
        service,
        verdict,
        eligible: verdict.is_eligible(),
    })
}
