//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe each upstream on its own interval
//! - Update upstream health state based on results
//! - Publish verdict flips to the restart supervisor

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::health::state::{HealthWriter, ProbeOutcome, Thresholds, VerdictChange};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::UpstreamService;

/// Why a probe did not count as a success.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("non-success status {0}")]
    Status(StatusCode),

    #[error("invalid probe request: {0}")]
    Request(String),
}

/// Issue one liveness probe against an upstream.
pub async fn probe(
    client: &Client<HttpConnector, Body>,
    service: &UpstreamService,
) -> Result<(), ProbeFailure> {
    let uri = Uri::builder()
        .scheme("http")
        .authority(service.authority.clone())
        .path_and_query(service.health_check.path.as_str())
        .build()
        .map_err(|e| ProbeFailure::Request(e.to_string()))?;

    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header("user-agent", "edge-proxy-health-check")
        .body(Body::empty())
        .map_err(|e| ProbeFailure::Request(e.to_string()))?;

    let timeout = service.health_check.timeout();
    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) if response.status().is_success() => Ok(()),
        Ok(Ok(response)) => Err(ProbeFailure::Status(response.status())),
        Ok(Err(e)) => Err(ProbeFailure::Connect(e.to_string())),
        Err(_) => Err(ProbeFailure::Timeout(timeout)),
    }
}

/// Probes a single upstream and owns its health slot.
pub struct UpstreamProber {
    service: Arc<UpstreamService>,
    writer: HealthWriter,
    client: Client<HttpConnector, Body>,
    events: mpsc::UnboundedSender<VerdictChange>,
}

impl UpstreamProber {
    pub fn new(
        service: Arc<UpstreamService>,
        writer: HealthWriter,
        client: Client<HttpConnector, Body>,
        events: mpsc::UnboundedSender<VerdictChange>,
    ) -> Self {
        Self {
            service,
            writer,
            client,
            events,
        }
    }

    /// Run one probe and apply its outcome.
    pub async fn probe_once(&self) -> Option<VerdictChange> {
        let name = &self.service.name;
        let outcome = match probe(&self.client, &self.service).await {
            Ok(()) => ProbeOutcome::Success,
            Err(failure) => {
                tracing::warn!(upstream = %name, error = %failure, "Health check failed");
                ProbeOutcome::Failure
            }
        };

        let change = self
            .writer
            .record(outcome, Thresholds::from(&self.service.health_check));
        let state = self.writer.current();
        metrics::record_upstream_health(name, state.verdict);

        if let Some(change) = &change {
            tracing::info!(
                upstream = %name,
                from = %change.from,
                to = %change.to,
                consecutive_failures = state.consecutive_failures,
                consecutive_successes = state.consecutive_successes,
                "Upstream verdict changed"
            );
            // Supervisor gone means shutdown is in progress.
            let _ = self.events.send(change.clone());
        }
        change
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval = self.service.health_check.interval();
        tracing::info!(
            upstream = %self.service.name,
            interval = ?interval,
            path = %self.service.health_check.path,
            "Health prober starting"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(upstream = %self.service.name, "Health prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Spawns one prober per monitored upstream.
pub struct HealthMonitor {
    client: Client<HttpConnector, Body>,
    events: mpsc::UnboundedSender<VerdictChange>,
}

impl HealthMonitor {
    pub fn new(events: mpsc::UnboundedSender<VerdictChange>) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());
        Self { client, events }
    }

    /// Start probing. Writers are paired with services by name; a service
    /// whose checks are disabled keeps its writer idle and stays `Unknown`.
    pub fn spawn(
        self,
        services: &[Arc<UpstreamService>],
        writers: Vec<HealthWriter>,
        shutdown: &Shutdown,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for writer in writers {
            let Some(service) = services.iter().find(|s| s.name == writer.upstream()) else {
                continue;
            };
            if !service.health_check.enabled {
                tracing::info!(upstream = %service.name, "Active health checks disabled");
                continue;
            }
            let prober = UpstreamProber::new(
                service.clone(),
                writer,
                self.client.clone(),
                self.events.clone(),
            );
            handles.push(tokio::spawn(prober.run(shutdown.subscribe())));
        }
        handles
    }
}
