//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the edge proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Upstream service definitions, in routing order.
    pub upstreams: Vec<UpstreamConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Restart supervisor policy.
    pub supervisor: SupervisorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Environment handed unchanged to every managed upstream process.
    pub passthrough: BTreeMap<String, String>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 25 * 1024 * 1024,
        }
    }
}

/// A logical upstream service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Unique service name, used in logs, metrics and the admin API.
    pub name: String,

    /// Upstream authority (e.g., "excel-api:8000" or "127.0.0.1:3000").
    pub address: String,

    /// Routing predicates, evaluated in order.
    #[serde(default)]
    pub routes: Vec<RoutePredicateConfig>,

    /// Liveness probe settings.
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// How to launch the upstream when the proxy manages its process.
    #[serde(default)]
    pub process: Option<ProcessConfig>,
}

/// A single routing predicate. Both conditions must hold when both are set.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RoutePredicateConfig {
    /// Path prefix to match (case-sensitive, whole segments: `/api` matches
    /// `/api/x` but not `/apix`).
    pub path_prefix: Option<String>,

    /// Host header to match (case-insensitive, port ignored).
    pub host: Option<String>,
}

/// Health check configuration for one upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Path to probe.
    pub path: String,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Consecutive failures before marking unhealthy.
    pub failure_threshold: u32,

    /// Consecutive successes before marking healthy again.
    pub recovery_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            interval_secs: 30,
            timeout_secs: 10,
            failure_threshold: 3,
            recovery_threshold: 1,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Command used to (re)launch a managed upstream.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProcessConfig {
    /// Program to execute.
    pub command: String,

    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment for this process only. Overrides `passthrough`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Timeout configuration for forwarded requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 60,
        }
    }
}

/// Restart supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Enable the restart supervisor.
    pub enabled: bool,

    /// How often every service is re-evaluated, in milliseconds.
    pub reconcile_interval_ms: u64,

    /// Time a relaunched service gets to turn healthy, in milliseconds.
    pub restart_grace_ms: u64,

    /// Window in which restarts count as rapid, in seconds.
    pub rapid_window_secs: u64,

    /// Rapid restarts tolerated before backoff applies.
    pub rapid_restart_threshold: u32,

    /// First backoff delay in milliseconds.
    pub base_backoff_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconcile_interval_ms: 1000,
            restart_grace_ms: 30_000,
            rapid_window_secs: 300,
            rapid_restart_threshold: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
