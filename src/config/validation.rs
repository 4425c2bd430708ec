//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (unique upstream names, parseable addresses)
//! - Validate value ranges (intervals > 0, thresholds > 0)
//! - Reject predicates that can never be told apart from a catch-all
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no upstreams configured")]
    NoUpstreams,

    #[error("upstream #{0} has an empty name")]
    EmptyName(usize),

    #[error("upstream '{0}' is defined more than once")]
    DuplicateName(String),

    #[error("upstream '{name}' has invalid address '{address}'")]
    InvalidAddress { name: String, address: String },

    #[error("upstream '{name}' route #{index} has neither path_prefix nor host")]
    EmptyPredicate { name: String, index: usize },

    #[error("upstream '{name}' route #{index} path_prefix '{prefix}' must start with '/'")]
    RelativePrefix { name: String, index: usize, prefix: String },

    #[error("upstream '{name}': {field} must be greater than zero")]
    ZeroValue { name: String, field: &'static str },

    #[error("upstream '{name}' health check path '{path}' must start with '/'")]
    RelativeProbePath { name: String, path: String },

    #[error("upstream '{0}' process command is empty")]
    EmptyCommand(String),

    #[error("{field} '{value}' is not a socket address")]
    InvalidBindAddress { field: &'static str, value: String },

    #[error("supervisor max_backoff_ms must be >= base_backoff_ms")]
    BackoffRange,

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("admin.api_key must not be empty when the admin API is enabled")]
    EmptyApiKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstreams.is_empty() {
        errors.push(ValidationError::NoUpstreams);
    }

    let mut seen = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let name = upstream.name.clone();
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyName(i));
        } else if !seen.insert(name.clone()) {
            errors.push(ValidationError::DuplicateName(name.clone()));
        }

        if upstream.address.parse::<Authority>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                name: name.clone(),
                address: upstream.address.clone(),
            });
        }

        for (index, route) in upstream.routes.iter().enumerate() {
            match (&route.path_prefix, &route.host) {
                (None, None) => errors.push(ValidationError::EmptyPredicate {
                    name: name.clone(),
                    index,
                }),
                (Some(prefix), _) if !prefix.starts_with('/') => {
                    errors.push(ValidationError::RelativePrefix {
                        name: name.clone(),
                        index,
                        prefix: prefix.clone(),
                    })
                }
                _ => {}
            }
        }

        let hc = &upstream.health_check;
        if hc.enabled {
            let zero_fields = [
                ("health_check.interval_secs", hc.interval_secs == 0),
                ("health_check.timeout_secs", hc.timeout_secs == 0),
                ("health_check.failure_threshold", hc.failure_threshold == 0),
                ("health_check.recovery_threshold", hc.recovery_threshold == 0),
            ];
            for (field, is_zero) in zero_fields {
                if is_zero {
                    errors.push(ValidationError::ZeroValue { name: name.clone(), field });
                }
            }
            if !hc.path.starts_with('/') {
                errors.push(ValidationError::RelativeProbePath {
                    name: name.clone(),
                    path: hc.path.clone(),
                });
            }
        }

        if let Some(process) = &upstream.process {
            if process.command.trim().is_empty() {
                errors.push(ValidationError::EmptyCommand(name.clone()));
            }
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress {
                field: "admin.bind_address",
                value: config.admin.bind_address.clone(),
            });
        }
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::EmptyApiKey);
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidBindAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.supervisor.max_backoff_ms < config.supervisor.base_backoff_ms {
        errors.push(ValidationError::BackoffRange);
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.request_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
