//! Preview factory
//!
//! Thin entry point holding both execution tiers. The host-process and
//! container tiers overlap in responsibility (both can run a backend), so
//! they are kept as separate strategies behind this one dispatcher rather
//! than merged; callers pick the tier per request with the `sandbox` flag.

use crate::container::{ContainerManager, ContainerManagerConfig, DockerStatus};
use crate::error::Result;
use crate::server::{ServerLogs, ServerStatus, ServerSupervisor, ServerSupervisorConfig};
use crate::session::PreviewStatus;
use crate::stats::StatsSnapshot;
use crate::store::ProjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use vitrine_spec::{OrchestratorConfig, PreviewRequest, ProjectId};

/// Both preview tiers behind one entry point
pub struct PreviewFactory {
    servers: Arc<ServerSupervisor>,
    containers: Arc<ContainerManager>,
    idle_timeout: Duration,
}

impl PreviewFactory {
    /// Construct both tiers from one orchestrator config. Probes the Docker
    /// daemon; an unreachable daemon leaves only the process tier enabled.
    pub async fn new(store: Arc<dyn ProjectStore>, config: &OrchestratorConfig) -> Self {
        let servers = Arc::new(ServerSupervisor::new(
            Arc::clone(&store),
            ServerSupervisorConfig::from_orchestrator(config),
        ));
        let containers = Arc::new(
            ContainerManager::new(store, ContainerManagerConfig::from_orchestrator(config)).await,
        );

        Self {
            servers,
            containers,
            idle_timeout: config.idle_timeout,
        }
    }

    /// Spawn the container tier's reconciliation sweep
    pub fn start_sweeps(&self) -> JoinHandle<()> {
        self.containers.start_sweeps()
    }

    /// Start a preview on the chosen tier
    pub async fn start(&self, request: &PreviewRequest, sandbox: bool) -> Result<PreviewStatus> {
        if sandbox {
            self.containers.start_container_preview(request).await
        } else {
            let session = self.servers.start(request).await?;
            Ok(session.preview_status())
        }
    }

    /// Stop a preview on the chosen tier; never errors
    pub async fn stop(&self, project: ProjectId, sandbox: bool) {
        if sandbox {
            self.containers.stop_container_preview(project).await;
        } else {
            self.servers.stop(project).await;
        }
    }

    /// Status on the chosen tier; absent sessions report `active: false`
    pub async fn status(&self, project: ProjectId, sandbox: bool) -> PreviewStatus {
        if sandbox {
            self.containers.get_status(project).await
        } else {
            self.servers.preview_status(project).await
        }
    }

    /// Close idle sessions on both tiers
    pub async fn cleanup_idle(&self) {
        self.servers.cleanup_idle(self.idle_timeout).await;
        self.containers.cleanup_idle(self.idle_timeout).await;
    }

    /// Snapshot of every live session across both tiers
    pub async fn all_previews(&self) -> Vec<PreviewStatus> {
        let mut previews = self.servers.all_previews().await;
        previews.extend(self.containers.all_previews().await);
        previews
    }

    /// Tear down everything on both tiers
    pub async fn shutdown(&self) {
        self.servers.stop_all().await;
        self.containers.shutdown().await;
    }

    pub fn is_docker_available(&self) -> bool {
        self.containers.is_available()
    }

    pub fn docker_status(&self) -> DockerStatus {
        self.containers.docker_status()
    }

    pub fn container_stats(&self) -> StatsSnapshot {
        self.containers.stats()
    }

    /// Direct access to the process tier (detection, logs, proxy wiring)
    pub fn servers(&self) -> &Arc<ServerSupervisor> {
        &self.servers
    }

    /// Direct access to the container tier
    pub fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    /// Convenience pass-throughs for the process tier's read accessors
    pub async fn server_status(&self, project: ProjectId) -> ServerStatus {
        self.servers.status(project).await
    }

    pub async fn server_logs(&self, project: ProjectId) -> ServerLogs {
        self.servers.logs(project).await
    }
}
