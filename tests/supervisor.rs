//! Restart supervisor behavior against a scripted launcher.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_proxy::config::{ProcessConfig, RoutePredicateConfig, SupervisorConfig, UpstreamConfig};
use edge_proxy::health::{HealthBoard, ProbeOutcome, Thresholds};
use edge_proxy::routing::{UpstreamRegistry, UpstreamService};
use edge_proxy::supervisor::{CommandLauncher, Launcher, RestartError, RestartView, Supervisor};
use edge_proxy::Shutdown;
use tokio::sync::mpsc;

/// Counts relaunches and fails the first `fail_first` of them.
///
/// Every attempt discards the previous instance, so after a failed attempt
/// nothing reports as exited.
struct ScriptedLauncher {
    launches: AtomicU32,
    fail_first: u32,
    exited: AtomicBool,
}

impl ScriptedLauncher {
    fn new(fail_first: u32, exited: bool) -> Self {
        Self {
            launches: AtomicU32::new(0),
            fail_first,
            exited: AtomicBool::new(exited),
        }
    }

    fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn relaunch(&self, service: &UpstreamService) -> Result<(), RestartError> {
        let attempt = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.exited.store(false, Ordering::SeqCst);
        if attempt <= self.fail_first {
            return Err(RestartError::Spawn {
                upstream: service.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }
        Ok(())
    }

    async fn has_exited(&self, _service: &UpstreamService) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

fn start_supervisor(
    upstream: UpstreamConfig,
    board: HealthBoard,
    launcher: Arc<dyn Launcher>,
    config: &SupervisorConfig,
) -> (RestartView, Shutdown) {
    let registry = UpstreamRegistry::from_config(&[upstream]).unwrap();
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(registry.services().to_vec(), board, launcher, config, events_rx);
    let view = supervisor.view();
    let shutdown = Shutdown::new();
    tokio::spawn(supervisor.run(shutdown.subscribe()));
    (view, shutdown)
}

fn upstream(managed: bool) -> UpstreamConfig {
    UpstreamConfig {
        name: "excel-api".into(),
        address: "127.0.0.1:8000".into(),
        routes: vec![RoutePredicateConfig {
            path_prefix: Some("/api".into()),
            host: None,
        }],
        health_check: Default::default(),
        process: managed.then(|| ProcessConfig {
            command: "excel-api".into(),
            ..Default::default()
        }),
    }
}

#[tokio::test]
async fn test_rapid_restarts_enter_backoff() {
    let registry = UpstreamRegistry::from_config(&[upstream(false)]).unwrap();
    let (board, writers) = HealthBoard::new(["excel-api"]);
    writers[0].record(ProbeOutcome::Failure, Thresholds { failure: 1, recovery: 1 });

    let launcher = Arc::new(ScriptedLauncher::new(0, false));
    let config = SupervisorConfig {
        enabled: true,
        reconcile_interval_ms: 20,
        restart_grace_ms: 0,
        rapid_window_secs: 60,
        rapid_restart_threshold: 2,
        base_backoff_ms: 600,
        max_backoff_ms: 5000,
    };
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(
        registry.services().to_vec(),
        board,
        launcher.clone(),
        &config,
        events_rx,
    );
    let view = supervisor.view();
    let shutdown = Shutdown::new();
    tokio::spawn(supervisor.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(launcher.launches(), 2);
    let record = view.get("excel-api").unwrap();
    assert_eq!(record.state, "backoff");
    assert_eq!(record.restart_count, 2);
    assert!(record.cooldown_remaining_ms.unwrap() > 0);

    // One restart after the first cooldown, then a doubled cooldown.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(launcher.launches(), 3);
    assert_eq!(view.get("excel-api").unwrap().state, "backoff");

    shutdown.trigger();
}

#[tokio::test]
async fn test_failed_relaunch_is_retried_with_backoff() {
    let registry = UpstreamRegistry::from_config(&[upstream(true)]).unwrap();
    let (board, _writers) = HealthBoard::new(["excel-api"]);

    let launcher = Arc::new(ScriptedLauncher::new(2, true));
    let config = SupervisorConfig {
        enabled: true,
        reconcile_interval_ms: 20,
        restart_grace_ms: 30_000,
        rapid_window_secs: 60,
        rapid_restart_threshold: 10,
        base_backoff_ms: 100,
        max_backoff_ms: 1000,
    };
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(
        registry.services().to_vec(),
        board,
        launcher.clone(),
        &config,
        events_rx,
    );
    let view = supervisor.view();
    let shutdown = Shutdown::new();
    tokio::spawn(supervisor.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(launcher.launches(), 3);
    let record = view.get("excel-api").unwrap();
    assert!(record.managed);
    assert_eq!(record.state, "running");
    assert_eq!(record.restart_count, 3);
    assert_eq!(record.consecutive_failures, 0);

    shutdown.trigger();
}

#[tokio::test]
async fn test_unhealthy_upstream_waits_out_grace_period() {
    let registry = UpstreamRegistry::from_config(&[upstream(false)]).unwrap();
    let (board, writers) = HealthBoard::new(["excel-api"]);
    writers[0].record(ProbeOutcome::Failure, Thresholds { failure: 1, recovery: 1 });

    let launcher = Arc::new(ScriptedLauncher::new(0, false));
    let config = SupervisorConfig {
        reconcile_interval_ms: 20,
        restart_grace_ms: 60_000,
        ..Default::default()
    };
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(
        registry.services().to_vec(),
        board,
        launcher.clone(),
        &config,
        events_rx,
    );
    let shutdown = Shutdown::new();
    tokio::spawn(supervisor.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(launcher.launches(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn test_failed_relaunch_retried_despite_healthy_verdict() {
    let (board, writers) = HealthBoard::new(["excel-api"]);
    writers[0].record(ProbeOutcome::Success, Thresholds { failure: 1, recovery: 1 });

    let launcher = Arc::new(ScriptedLauncher::new(1, true));
    let config = SupervisorConfig {
        reconcile_interval_ms: 20,
        restart_grace_ms: 30_000,
        base_backoff_ms: 100,
        max_backoff_ms: 1000,
        ..Default::default()
    };
    let (view, shutdown) = start_supervisor(upstream(true), board, launcher.clone(), &config);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(launcher.launches(), 2);
    let record = view.get("excel-api").unwrap();
    assert_eq!(record.state, "running");
    assert_eq!(record.consecutive_failures, 0);

    shutdown.trigger();
}

#[cfg(unix)]
#[tokio::test]
async fn test_exited_child_restarted_without_waiting_for_grace() {
    let mut up = upstream(true);
    up.health_check.enabled = false;
    up.process = Some(ProcessConfig {
        command: "sh".into(),
        args: vec!["-c".into(), "exit 0".into()],
        ..Default::default()
    });
    let service = UpstreamService::from_config(&up).unwrap();

    let launcher = Arc::new(CommandLauncher::new(Default::default()));
    launcher.relaunch(&service).await.unwrap();

    let (board, _writers) = HealthBoard::new(["excel-api"]);
    let config = SupervisorConfig {
        reconcile_interval_ms: 20,
        restart_grace_ms: 60_000,
        rapid_restart_threshold: 1,
        base_backoff_ms: 10_000,
        max_backoff_ms: 60_000,
        ..Default::default()
    };
    let (view, shutdown) = start_supervisor(up, board, launcher.clone(), &config);

    // One restart, then the next exit lands inside the rapid window.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let record = view.get("excel-api").unwrap();
    assert_eq!(record.restart_count, 1);
    assert_eq!(record.state, "backoff");

    shutdown.trigger();
    launcher.stop_all().await;
}

#[tokio::test]
async fn test_spawn_failures_keep_retrying() {
    let mut up = upstream(true);
    up.health_check.enabled = false;
    up.process = Some(ProcessConfig {
        command: "/nonexistent/edge-proxy-upstream".into(),
        ..Default::default()
    });
    let service = UpstreamService::from_config(&up).unwrap();

    let launcher = Arc::new(CommandLauncher::new(Default::default()));
    assert!(launcher.relaunch(&service).await.is_err());

    let (board, _writers) = HealthBoard::new(["excel-api"]);
    let config = SupervisorConfig {
        reconcile_interval_ms: 20,
        restart_grace_ms: 60_000,
        rapid_restart_threshold: 10,
        base_backoff_ms: 50,
        max_backoff_ms: 1000,
        ..Default::default()
    };
    let (view, shutdown) = start_supervisor(up, board, launcher.clone(), &config);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let record = view.get("excel-api").unwrap();
    assert!(record.restart_count >= 3, "restart_count = {}", record.restart_count);
    assert!(record.consecutive_failures >= 3);
    assert_eq!(record.state, "backoff");

    shutdown.trigger();
}
