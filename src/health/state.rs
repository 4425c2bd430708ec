//! Upstream health state machine.
//!
//! # States
//! - Unknown: no verdict yet, upstream still receives traffic
//! - Healthy: upstream receives traffic
//! - Unhealthy: requests are short-circuited
//!
//! # State Transitions
//! ```text
//! Unknown/Healthy → Unhealthy: consecutive failures >= failure_threshold
//! Unknown/Unhealthy → Healthy: consecutive successes >= recovery_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Each probe publishes a whole new `HealthState`; readers never see a
//!   counter bumped without the verdict that goes with it
//! - One writer per upstream, enforced by a non-cloneable `HealthWriter`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::HealthCheckConfig;

/// Current classification of an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Unknown,
    Healthy,
    Unhealthy,
}

impl Verdict {
    /// Whether requests may be forwarded under this verdict.
    pub fn is_eligible(self) -> bool {
        self != Verdict::Unhealthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Unknown => "unknown",
            Verdict::Healthy => "healthy",
            Verdict::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

/// Hysteresis thresholds for one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub failure: u32,
    pub recovery: u32,
}

impl From<&HealthCheckConfig> for Thresholds {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            failure: config.failure_threshold.max(1),
            recovery: config.recovery_threshold.max(1),
        }
    }
}

/// Health record for one upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    pub verdict: Verdict,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe: Option<Instant>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            verdict: Verdict::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_probe: None,
        }
    }
}

impl HealthState {
    /// Apply one probe outcome and return the next state.
    pub fn observe(&self, outcome: ProbeOutcome, thresholds: Thresholds, now: Instant) -> Self {
        let mut next = self.clone();
        next.last_probe = Some(now);

        match outcome {
            ProbeOutcome::Success => {
                next.consecutive_failures = 0;
                next.consecutive_successes = self.consecutive_successes.saturating_add(1);
                if next.consecutive_successes >= thresholds.recovery {
                    next.verdict = Verdict::Healthy;
                }
            }
            ProbeOutcome::Failure => {
                next.consecutive_successes = 0;
                next.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if next.consecutive_failures >= thresholds.failure {
                    next.verdict = Verdict::Unhealthy;
                }
            }
        }

        next
    }
}

/// A verdict flip, published to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictChange {
    pub upstream: String,
    pub from: Verdict,
    pub to: Verdict,
}

/// Read side of the health board, shared by every request handler.
#[derive(Debug, Clone, Default)]
pub struct HealthBoard {
    slots: Arc<HashMap<String, Arc<ArcSwap<HealthState>>>>,
}

impl HealthBoard {
    /// Create a board for the given upstreams plus one writer per upstream.
    pub fn new<I, S>(upstreams: I) -> (Self, Vec<HealthWriter>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots = HashMap::new();
        let mut writers = Vec::new();
        for name in upstreams {
            let name = name.into();
            let slot = Arc::new(ArcSwap::from_pointee(HealthState::default()));
            writers.push(HealthWriter {
                upstream: name.clone(),
                slot: slot.clone(),
            });
            slots.insert(name, slot);
        }
        (Self { slots: Arc::new(slots) }, writers)
    }

    /// Latest snapshot for an upstream. Never blocks.
    pub fn current(&self, upstream: &str) -> Option<Arc<HealthState>> {
        self.slots.get(upstream).map(|slot| slot.load_full())
    }

    /// Latest verdict, `Unknown` for upstreams the board does not track.
    pub fn verdict(&self, upstream: &str) -> Verdict {
        self.current(upstream)
            .map(|state| state.verdict)
            .unwrap_or(Verdict::Unknown)
    }

    pub fn upstream_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

/// Sole writer of one upstream's health slot.
#[derive(Debug)]
pub struct HealthWriter {
    upstream: String,
    slot: Arc<ArcSwap<HealthState>>,
}

impl HealthWriter {
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn current(&self) -> Arc<HealthState> {
        self.slot.load_full()
    }

    /// Record a probe outcome; returns the verdict flip, if any.
    pub fn record(&self, outcome: ProbeOutcome, thresholds: Thresholds) -> Option<VerdictChange> {
        self.record_at(outcome, thresholds, Instant::now())
    }

    pub fn record_at(
        &self,
        outcome: ProbeOutcome,
        thresholds: Thresholds,
        now: Instant,
    ) -> Option<VerdictChange> {
        let previous = self.slot.load_full();
        let next = previous.observe(outcome, thresholds, now);
        let change = (next.verdict != previous.verdict).then(|| VerdictChange {
            upstream: self.upstream.clone(),
            from: previous.verdict,
            to: next.verdict,
        });
        self.slot.store(Arc::new(next));
        change
    }
}
