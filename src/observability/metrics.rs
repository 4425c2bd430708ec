//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_proxy_requests_total` (counter): requests by upstream, verdict, status
//! - `edge_proxy_request_duration_seconds` (histogram): latency per upstream
//! - `edge_proxy_upstream_health` (gauge): 1=healthy, 0=unhealthy, -1=unknown
//! - `edge_proxy_restarts_total` (counter): restarts issued per upstream
//! - `edge_proxy_restart_failures_total` (counter): failed relaunches per upstream
//!
//! Recording is a no-op until `init_metrics` installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::Verdict;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    if let Err(e) = builder.install() {
        tracing::error!(error = %e, "Failed to install Prometheus exporter");
        return;
    }

    describe_counter!("edge_proxy_requests_total", "Total requests handled by the proxy");
    describe_histogram!(
        "edge_proxy_request_duration_seconds",
        "Request latency in seconds, including the upstream round trip"
    );
    describe_gauge!("edge_proxy_upstream_health", "Upstream verdict (1 healthy, 0 unhealthy, -1 unknown)");
    describe_counter!("edge_proxy_restarts_total", "Upstream restarts issued by the supervisor");
    describe_counter!("edge_proxy_restart_failures_total", "Upstream relaunch attempts that failed");

    tracing::info!(address = %addr, "Metrics exporter listening");
}

pub fn record_request(upstream: &str, verdict: Verdict, status: u16, start: Instant) {
    counter!(
        "edge_proxy_requests_total",
        "upstream" => upstream.to_string(),
        "verdict" => verdict.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("edge_proxy_request_duration_seconds", "upstream" => upstream.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_health(upstream: &str, verdict: Verdict) {
    let value = match verdict {
        Verdict::Healthy => 1.0,
        Verdict::Unhealthy => 0.0,
        Verdict::Unknown => -1.0,
    };
    gauge!("edge_proxy_upstream_health", "upstream" => upstream.to_string()).set(value);
}

pub fn record_restart(upstream: &str) {
    counter!("edge_proxy_restarts_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_restart_failure(upstream: &str) {
    counter!("edge_proxy_restart_failures_total", "upstream" => upstream.to_string()).increment(1);
}
