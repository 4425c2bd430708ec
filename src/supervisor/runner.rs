//! The restart supervisor task.
//!
//! # Responsibilities
//! - Listen for verdict flips from the health monitor
//! - Periodically reconcile every upstream (verdict + process liveness)
//! - Drive the restart policy and run relaunches off the control loop
//! - Publish a snapshot of restart records for the admin API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};

use crate::config::SupervisorConfig;
use crate::health::{HealthBoard, Verdict, VerdictChange};
use crate::observability::metrics;
use crate::routing::UpstreamService;
use crate::supervisor::launcher::{Launcher, RestartError};
use crate::supervisor::policy::{Action, FailureSignal, RestartPolicy, RestartRecord, RestartState};

/// Restart record as exposed to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestartSnapshot {
    pub upstream: String,
    pub managed: bool,
    pub state: &'static str,
    pub restart_count: u64,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: Option<u64>,
}

/// Read handle on the supervisor's published records.
#[derive(Debug, Clone, Default)]
pub struct RestartView {
    inner: Arc<ArcSwap<Vec<RestartSnapshot>>>,
}

impl RestartView {
    pub fn snapshot(&self) -> Arc<Vec<RestartSnapshot>> {
        self.inner.load_full()
    }

    pub fn get(&self, upstream: &str) -> Option<RestartSnapshot> {
        self.inner.load().iter().find(|s| s.upstream == upstream).cloned()
    }
}

type Completion = (String, Result<(), RestartError>);

pub struct Supervisor {
    services: Vec<Arc<UpstreamService>>,
    health: HealthBoard,
    launcher: Arc<dyn Launcher>,
    policy: RestartPolicy,
    reconcile_interval: Duration,
    records: HashMap<String, RestartRecord>,
    events: mpsc::UnboundedReceiver<VerdictChange>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    view: RestartView,
}

impl Supervisor {
    pub fn new(
        services: Vec<Arc<UpstreamService>>,
        health: HealthBoard,
        launcher: Arc<dyn Launcher>,
        config: &SupervisorConfig,
        events: mpsc::UnboundedReceiver<VerdictChange>,
    ) -> Self {
        let now = Instant::now();
        let records = services
            .iter()
            .map(|s| (s.name.clone(), RestartRecord::new(now)))
            .collect();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            services,
            health,
            launcher,
            policy: RestartPolicy::from(config),
            reconcile_interval: Duration::from_millis(config.reconcile_interval_ms.max(1)),
            records,
            events,
            completions_tx,
            completions_rx,
            view: RestartView::default(),
        };
        supervisor.publish(now);
        supervisor
    }

    pub fn view(&self) -> RestartView {
        self.view.clone()
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            upstreams = self.services.len(),
            interval = ?self.reconcile_interval,
            "Restart supervisor starting"
        );

        let mut ticker = time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(change) = self.events.recv() => {
                    tracing::debug!(upstream = %change.upstream, to = %change.to, "Supervisor observed verdict change");
                    self.reconcile_one(&change.upstream, Instant::now()).await;
                }
                Some((upstream, result)) = self.completions_rx.recv() => {
                    self.finish(&upstream, result, Instant::now());
                }
                _ = ticker.tick() => {
                    self.reconcile_all(Instant::now()).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Restart supervisor received shutdown signal, exiting loop");
                    break;
                }
            }
            self.publish(Instant::now());
        }
    }

    async fn reconcile_all(&mut self, now: Instant) {
        let names: Vec<String> = self.services.iter().map(|s| s.name.clone()).collect();
        for name in names {
            self.reconcile_one(&name, now).await;
        }
    }

    async fn reconcile_one(&mut self, upstream: &str, now: Instant) {
        let Some(service) = self.services.iter().find(|s| s.name == upstream).cloned() else {
            return;
        };

        let pending = self
            .records
            .get(upstream)
            .is_some_and(RestartRecord::relaunch_pending);
        let signal = if pending {
            FailureSignal::RelaunchFailed
        } else if service.is_managed() && self.launcher.has_exited(&service).await {
            FailureSignal::Exited
        } else {
            match self.health.verdict(upstream) {
                Verdict::Unhealthy => FailureSignal::Unhealthy,
                Verdict::Healthy => {
                    if let Some(record) = self.records.get_mut(upstream) {
                        record.on_healthy(now);
                    }
                    return;
                }
                Verdict::Unknown => return,
            }
        };

        let Some(record) = self.records.get_mut(upstream) else {
            return;
        };
        let before = record.state;
        let action = record.on_failure(signal, now, &self.policy);

        match action {
            Action::Restart => {
                tracing::warn!(
                    upstream = %upstream,
                    signal = ?signal,
                    restart_count = record.restart_count,
                    "Restarting upstream"
                );
                metrics::record_restart(upstream);
                self.spawn_relaunch(service);
            }
            Action::WaitUntil(until) => {
                if let (RestartState::Running { .. }, RestartState::Backoff { .. }) = (before, record.state) {
                    tracing::warn!(
                        upstream = %upstream,
                        delay = ?until.saturating_duration_since(now),
                        restart_count = record.restart_count,
                        "Upstream restarting too often, backing off"
                    );
                }
            }
            Action::None => {}
        }
    }

    fn spawn_relaunch(&self, service: Arc<UpstreamService>) {
        let launcher = self.launcher.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = launcher.relaunch(&service).await;
            let _ = tx.send((service.name.clone(), result));
        });
    }

    fn finish(&mut self, upstream: &str, result: Result<(), RestartError>, now: Instant) {
        let Some(record) = self.records.get_mut(upstream) else {
            return;
        };
        match &result {
            Ok(()) => {
                tracing::info!(upstream = %upstream, restart_count = record.restart_count, "Upstream relaunched");
            }
            Err(e) => {
                tracing::error!(upstream = %upstream, error = %e, "Upstream relaunch failed");
                metrics::record_restart_failure(upstream);
            }
        }
        record.on_relaunched(result.is_ok(), now, &self.policy);
    }

    fn publish(&self, now: Instant) {
        let snapshot = self
            .services
            .iter()
            .filter_map(|service| {
                let record = self.records.get(&service.name)?;
                Some(RestartSnapshot {
                    upstream: service.name.clone(),
                    managed: service.is_managed(),
                    state: record.state.name(),
                    restart_count: record.restart_count,
                    consecutive_failures: record.consecutive_failures,
                    cooldown_remaining_ms: record
                        .cooldown_until()
                        .map(|until| until.saturating_duration_since(now).as_millis() as u64),
                })
            })
            .collect();
        self.view.inner.store(Arc::new(snapshot));
    }
}
