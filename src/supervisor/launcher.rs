//! Process launching for managed upstreams.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::routing::UpstreamService;

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("failed to stop '{upstream}': {source}")]
    Stop {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn '{upstream}': {source}")]
    Spawn {
        upstream: String,
        #[source]
        source: std::io::Error,
    },
}

/// Seam between the supervisor and whatever runs upstream processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start the upstream, replacing any previous instance.
    async fn relaunch(&self, service: &UpstreamService) -> Result<(), RestartError>;

    /// Whether the upstream has no live instance, because it exited or
    /// never started.
    async fn has_exited(&self, service: &UpstreamService) -> bool;
}

/// Runs managed upstreams as child processes.
///
/// Upstreams without a `process` section are left to the outer
/// orchestrator; relaunching them only logs.
pub struct CommandLauncher {
    passthrough: BTreeMap<String, String>,
    children: Mutex<HashMap<String, Child>>,
}

impl CommandLauncher {
    pub fn new(passthrough: BTreeMap<String, String>) -> Self {
        Self {
            passthrough,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Process id of the running instance, if any.
    pub async fn pid(&self, upstream: &str) -> Option<u32> {
        self.children.lock().await.get(upstream).and_then(Child::id)
    }

    /// Kill every child. Used on shutdown.
    pub async fn stop_all(&self) {
        let mut children = self.children.lock().await;
        for (name, mut child) in children.drain() {
            if let Err(e) = child.kill().await {
                tracing::warn!(upstream = %name, error = %e, "Failed to stop upstream process");
            } else {
                tracing::info!(upstream = %name, "Upstream process stopped");
            }
        }
    }

    fn command(&self, service: &UpstreamService) -> Option<Command> {
        let process = service.process.as_ref()?;
        let mut cmd = Command::new(&process.command);
        cmd.args(&process.args)
            .envs(&self.passthrough)
            .envs(&process.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &process.working_dir {
            cmd.current_dir(dir);
        }
        Some(cmd)
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn relaunch(&self, service: &UpstreamService) -> Result<(), RestartError> {
        let Some(mut cmd) = self.command(service) else {
            tracing::warn!(
                upstream = %service.name,
                "Upstream is not managed by the proxy; restart left to the orchestrator"
            );
            return Ok(());
        };

        let mut children = self.children.lock().await;
        if let Some(mut old) = children.remove(&service.name) {
            if matches!(old.try_wait(), Ok(None)) {
                old.kill().await.map_err(|source| RestartError::Stop {
                    upstream: service.name.clone(),
                    source,
                })?;
            }
        }

        let child = cmd.spawn().map_err(|source| RestartError::Spawn {
            upstream: service.name.clone(),
            source,
        })?;
        tracing::info!(upstream = %service.name, pid = ?child.id(), "Upstream process launched");
        children.insert(service.name.clone(), child);
        Ok(())
    }

    async fn has_exited(&self, service: &UpstreamService) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(&service.name) {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => service.is_managed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessConfig, UpstreamConfig};

    fn service(process: Option<ProcessConfig>) -> UpstreamService {
        UpstreamService::from_config(&UpstreamConfig {
            name: "worker".into(),
            address: "127.0.0.1:1".into(),
            routes: Vec::new(),
            health_check: Default::default(),
            process,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_unmanaged_relaunch_is_noop() {
        let launcher = CommandLauncher::new(BTreeMap::new());
        let svc = service(None);
        assert!(launcher.relaunch(&svc).await.is_ok());
        assert!(!launcher.has_exited(&svc).await);
        assert!(launcher.pid("worker").await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let launcher = CommandLauncher::new(BTreeMap::new());
        let svc = service(Some(ProcessConfig {
            command: "/nonexistent/definitely-not-a-binary".into(),
            ..Default::default()
        }));
        assert!(launcher.has_exited(&svc).await);
        let err = launcher.relaunch(&svc).await.unwrap_err();
        assert!(matches!(err, RestartError::Spawn { .. }));
        // No child is left behind, so the supervisor sees it as down.
        assert!(launcher.has_exited(&svc).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_detected_and_relaunch_replaces_child() {
        let launcher = CommandLauncher::new(BTreeMap::new());
        let svc = service(Some(ProcessConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "exit 0".into()],
            ..Default::default()
        }));
        launcher.relaunch(&svc).await.unwrap();

        let mut exited = false;
        for _ in 0..50 {
            if launcher.has_exited(&svc).await {
                exited = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(exited);

        launcher.relaunch(&svc).await.unwrap();
        launcher.stop_all().await;
        assert!(launcher.pid("worker").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passthrough_env_reaches_child() {
        let out = std::env::temp_dir().join(format!("edge-proxy-env-{}", std::process::id()));
        let _ = std::fs::remove_file(&out);

        let passthrough = BTreeMap::from([
            ("EDGE_SHARED_TOKEN".to_string(), "from-passthrough".to_string()),
            ("EDGE_MODE".to_string(), "shared".to_string()),
        ]);
        let env = BTreeMap::from([
            ("EDGE_MODE".to_string(), "local".to_string()),
            ("EDGE_OUT".to_string(), out.display().to_string()),
        ]);
        let launcher = CommandLauncher::new(passthrough);
        let svc = service(Some(ProcessConfig {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                r#"printf '%s %s' "$EDGE_SHARED_TOKEN" "$EDGE_MODE" > "$EDGE_OUT.tmp" && mv "$EDGE_OUT.tmp" "$EDGE_OUT""#.into(),
            ],
            env,
            ..Default::default()
        }));
        launcher.relaunch(&svc).await.unwrap();

        let mut contents = None;
        for _ in 0..100 {
            if let Ok(text) = tokio::fs::read_to_string(&out).await {
                contents = Some(text);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let _ = std::fs::remove_file(&out);
        // Per-process env wins over the shared passthrough table.
        assert_eq!(contents.as_deref(), Some("from-passthrough local"));
        launcher.stop_all().await;
    }
}
