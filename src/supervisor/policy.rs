//! Restart policy state machine.
//!
//! # States
//! ```text
//! Running ──failure──▶ Restarting ──relaunched──▶ Running
//!    │                     │
//!    │ rapid restarts      │ relaunch failed
//!    ▼                     ▼
//! Backoff ──until passed, still failing──▶ Restarting
//! ```
//!
//! # Design Decisions
//! - Pure: every transition takes `now`, so tests drive the clock
//! - A failure while `Restarting` is ignored (restart unless already restarting)
//! - A relaunched service gets a grace period before an unhealthy verdict counts
//! - Backoff applies once restarts inside the rapid window reach the threshold

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::SupervisorConfig;
use crate::supervisor::backoff::calculate_backoff;

/// Tunables derived from `SupervisorConfig`.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub grace: Duration,
    pub rapid_window: Duration,
    pub rapid_threshold: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.restart_grace_ms),
            rapid_window: Duration::from_secs(config.rapid_window_secs),
            rapid_threshold: config.rapid_restart_threshold.max(1),
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RestartPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_backoff_ms, self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartState {
    Running { since: Instant },
    Restarting { since: Instant },
    Backoff { since: Instant, until: Instant },
}

impl RestartState {
    pub fn name(&self) -> &'static str {
        match self {
            RestartState::Running { .. } => "running",
            RestartState::Restarting { .. } => "restarting",
            RestartState::Backoff { .. } => "backoff",
        }
    }
}

/// What made the supervisor look at a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// Health monitor holds an `unhealthy` verdict.
    Unhealthy,
    /// The managed process exited. Skips the grace period.
    Exited,
    /// The last relaunch attempt failed and is due for a retry,
    /// whatever the current verdict.
    RelaunchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Restart,
    WaitUntil(Instant),
}

/// Supervisor bookkeeping for one upstream.
#[derive(Debug, Clone)]
pub struct RestartRecord {
    pub state: RestartState,
    pub restart_count: u64,
    /// Relaunch attempts that failed in a row.
    pub consecutive_failures: u32,
    recent: VecDeque<Instant>,
}

impl RestartRecord {
    pub fn new(now: Instant) -> Self {
        Self {
            state: RestartState::Running { since: now },
            restart_count: 0,
            consecutive_failures: 0,
            recent: VecDeque::new(),
        }
    }

    /// End of the current backoff, if any.
    pub fn cooldown_until(&self) -> Option<Instant> {
        match self.state {
            RestartState::Backoff { until, .. } => Some(until),
            _ => None,
        }
    }

    /// A failed relaunch is waiting for its retry.
    pub fn relaunch_pending(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// Restarts that happened inside the rapid window ending at `now`.
    pub fn recent_restarts(&mut self, now: Instant, window: Duration) -> usize {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.len()
    }

    /// React to a failure signal.
    pub fn on_failure(&mut self, signal: FailureSignal, now: Instant, policy: &RestartPolicy) -> Action {
        match self.state {
            RestartState::Restarting { .. } => Action::None,
            RestartState::Backoff { until, .. } => {
                if now >= until {
                    self.begin_restart(now);
                    Action::Restart
                } else {
                    Action::WaitUntil(until)
                }
            }
            RestartState::Running { since } => {
                let grace_end = since + policy.grace;
                if signal == FailureSignal::Unhealthy && now < grace_end {
                    return Action::WaitUntil(grace_end);
                }

                let rapid = self.recent_restarts(now, policy.rapid_window) as u32;
                if rapid >= policy.rapid_threshold {
                    let attempt = rapid - policy.rapid_threshold + 1;
                    let until = now + policy.backoff(attempt);
                    self.state = RestartState::Backoff { since: now, until };
                    Action::WaitUntil(until)
                } else {
                    self.begin_restart(now);
                    Action::Restart
                }
            }
        }
    }

    /// Service looks healthy again.
    ///
    /// A backoff left by a failed relaunch is kept: the verdict may predate
    /// the crash, and the retry must still happen.
    pub fn on_healthy(&mut self, now: Instant) {
        if self.relaunch_pending() {
            return;
        }
        if let RestartState::Backoff { .. } = self.state {
            self.state = RestartState::Running { since: now };
        }
    }

    /// A relaunch attempt finished.
    pub fn on_relaunched(&mut self, succeeded: bool, now: Instant, policy: &RestartPolicy) {
        if succeeded {
            self.consecutive_failures = 0;
            self.state = RestartState::Running { since: now };
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            let until = now + policy.backoff(self.consecutive_failures);
            self.state = RestartState::Backoff { since: now, until };
        }
    }

    fn begin_restart(&mut self, now: Instant) {
        self.state = RestartState::Restarting { since: now };
        self.restart_count += 1;
        self.recent.push_back(now);
    }
}
