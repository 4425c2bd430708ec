use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::health::Verdict;
use crate::supervisor::RestartSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub upstreams: usize,
    pub unhealthy: usize,
}

#[derive(Serialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub address: String,
    pub managed: bool,
    pub verdict: Verdict,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe_secs_ago: Option<u64>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let services = state.registry.services();
    let unhealthy = services
        .iter()
        .filter(|s| state.health.verdict(&s.name) == Verdict::Unhealthy)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if unhealthy == 0 { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        upstreams: services.len(),
        unhealthy,
    })
}

pub async fn get_upstreams(State(state): State<AdminState>) -> Json<Vec<UpstreamStatus>> {
    let statuses = state
        .registry
        .services()
        .iter()
        .map(|service| {
            let health = state.health.current(&service.name).unwrap_or_default();
            UpstreamStatus {
                name: service.name.clone(),
                address: service.authority.to_string(),
                managed: service.is_managed(),
                verdict: health.verdict,
                consecutive_failures: health.consecutive_failures,
                consecutive_successes: health.consecutive_successes,
                last_probe_secs_ago: health.last_probe.map(|t| t.elapsed().as_secs()),
            }
        })
        .collect();

    Json(statuses)
}

pub async fn get_restarts(State(state): State<AdminState>) -> Json<Vec<RestartSnapshot>> {
    Json(state.restarts.snapshot().as_ref().clone())
}
