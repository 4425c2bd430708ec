//! Startup orchestration.
//!
//! # Responsibilities
//! - Compile the registry and health board from validated configuration
//! - Launch managed upstream processes
//! - Start background tasks (probers, supervisor, admin, metrics)
//! - Serve traffic last, stop managed children after shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - After startup nothing upstream-related can stop the proxy

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::{ConfigError, ProxyConfig};
use crate::health::{HealthBoard, HealthMonitor, HealthWriter};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::UpstreamRegistry;
use crate::supervisor::{CommandLauncher, Launcher, RestartView, Supervisor};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid upstream: {0}")]
    Registry(#[from] ValidationError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// A fully wired proxy, ready to serve.
pub struct Proxy {
    config: ProxyConfig,
    registry: Arc<UpstreamRegistry>,
    health: HealthBoard,
    writers: Vec<HealthWriter>,
    launcher: Arc<CommandLauncher>,
    supervisor: Supervisor,
    restarts: RestartView,
    monitor: HealthMonitor,
}

impl Proxy {
    /// Validate configuration and build every subsystem.
    pub fn build(config: ProxyConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let registry = Arc::new(UpstreamRegistry::from_config(&config.upstreams)?);
        let (health, writers) =
            HealthBoard::new(registry.services().iter().map(|s| s.name.clone()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let monitor = HealthMonitor::new(events_tx);

        let launcher = Arc::new(CommandLauncher::new(config.passthrough.clone()));
        let supervisor = Supervisor::new(
            registry.services().to_vec(),
            health.clone(),
            launcher.clone(),
            &config.supervisor,
            events_rx,
        );
        let restarts = supervisor.view();

        tracing::info!(
            upstreams = registry.services().len(),
            managed = registry.services().iter().filter(|s| s.is_managed()).count(),
            "Proxy configured"
        );

        Ok(Self {
            config,
            registry,
            health,
            writers,
            launcher,
            supervisor,
            restarts,
            monitor,
        })
    }

    pub fn health(&self) -> HealthBoard {
        self.health.clone()
    }

    pub fn restarts(&self) -> RestartView {
        self.restarts.clone()
    }

    pub fn registry(&self) -> Arc<UpstreamRegistry> {
        self.registry.clone()
    }

    /// Start background tasks and serve until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), StartupError> {
        let Proxy {
            config,
            registry,
            health,
            writers,
            launcher,
            supervisor,
            restarts,
            monitor,
        } = self;

        if config.observability.metrics_enabled {
            if let Ok(addr) = config.observability.metrics_address.parse::<SocketAddr>() {
                metrics::init_metrics(addr);
            }
        }

        for service in registry.services().iter().filter(|s| s.is_managed()) {
            if let Err(e) = launcher.relaunch(service).await {
                // No child is left behind, so the supervisor retries it as exited.
                tracing::error!(upstream = %service.name, error = %e, "Initial launch failed");
            }
        }

        let _probers = monitor.spawn(registry.services(), writers, shutdown);

        if config.supervisor.enabled {
            tokio::spawn(supervisor.run(shutdown.subscribe()));
        } else {
            tracing::info!("Restart supervisor disabled");
        }

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address)
                .await
                .map_err(|source| StartupError::Bind {
                    address: config.admin.bind_address.clone(),
                    source,
                })?;
            let router = setup_admin_router(AdminState {
                registry: registry.clone(),
                health: health.clone(),
                restarts,
                api_key: Arc::from(config.admin.api_key.as_str()),
                started_at: Instant::now(),
            });
            let mut admin_shutdown = shutdown.subscribe();
            tracing::info!(address = %config.admin.bind_address, "Admin API listening");
            tokio::spawn(async move {
                let result = axum::serve(admin_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            });
        }

        let server = HttpServer::new(&config, registry, health);
        let result = server.run(listener, shutdown.subscribe()).await;

        launcher.stop_all().await;
        result.map_err(StartupError::from)
    }
}

/// Bind the listener from configuration.
pub async fn bind(config: &ProxyConfig) -> Result<TcpListener, StartupError> {
    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Listening for connections");
    }
    Ok(listener)
}
