//! Container sandbox manager
//!
//! Runs project previews inside hardened Docker containers: a per-project
//! image is built from a framework-specific template with no build cache (so
//! every preview reflects current files), then launched with hard resource
//! ceilings, a seccomp profile, a read-only root, and a dropped capability
//! set. A periodic reconciliation sweep removes orphaned containers (left
//! behind by orchestrator crashes) and sessions past their maximum age.
//!
//! If the Docker daemon is unreachable at construction, the whole subsystem
//! self-disables instead of failing, so the host-process tier keeps working.

use crate::detect::infer_framework;
use crate::error::{AgentError, Result};
use crate::ports::PortPool;
use crate::readiness::wait_for_port;
use crate::seccomp::write_profile;
use crate::session::{Lifecycle, PreviewStatus, SessionState};
use crate::stats::{PreviewStats, StatsSnapshot};
use crate::store::{ProjectFile, ProjectStore};
use crate::templates::dockerfile_for;
use crate::workdir::{create_work_dir, materialize, remove_work_dir};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::query_parameters::{
    CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, RemoveImageOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitrine_spec::{Framework, OrchestratorConfig, PreviewRequest, ProjectId, SandboxProfile};

/// Label carried by every preview container; the orphan sweep keys off it
pub const PREVIEW_LABEL: &str = "vitrine.preview";
/// Label naming the owning project
pub const PROJECT_LABEL: &str = "vitrine.project";

/// Readiness poll cadence for containers
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Grace seconds passed to `docker stop` during teardown
const STOP_GRACE_SECS: i32 = 5;

/// Container tier tuning, derived from [`OrchestratorConfig`]
#[derive(Debug, Clone)]
pub struct ContainerManagerConfig {
    pub image_prefix: String,
    pub port_base: u16,
    pub port_probe_limit: u16,
    pub max_containers: u32,
    pub cleanup_interval: Duration,
    /// Readiness deadline; expiry is a warning, not a failure
    pub ready_timeout: Duration,
    pub temp_base: PathBuf,
    pub profile: SandboxProfile,
}

impl Default for ContainerManagerConfig {
    fn default() -> Self {
        Self::from_orchestrator(&OrchestratorConfig::default())
    }
}

impl ContainerManagerConfig {
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            image_prefix: config.image_prefix.clone(),
            port_base: config.container_port_base,
            port_probe_limit: config.port_probe_limit,
            max_containers: config.max_containers,
            cleanup_interval: config.cleanup_interval,
            ready_timeout: config.container_ready_timeout,
            temp_base: config.temp_dir.join("containers"),
            profile: config.sandbox.clone(),
        }
    }
}

/// One live containerized preview
pub struct ContainerSession {
    pub project: ProjectId,
    pub container_id: String,
    pub container_name: String,
    pub image: String,
    pub port: u16,
    pub internal_port: u16,
    pub framework: Framework,
    pub work_dir: PathBuf,
    /// Resource/security configuration the container was launched with
    pub profile: SandboxProfile,
    lifecycle: Lifecycle,
}

impl ContainerSession {
    pub fn preview_status(&self) -> PreviewStatus {
        PreviewStatus::active(self.project, self.port, &self.lifecycle)
    }
}

/// Reachability report for the container runtime
#[derive(Debug, Clone, Serialize)]
pub struct DockerStatus {
    pub available: bool,
    pub active_containers: i64,
    pub max_containers: u32,
}

/// Manager for the container execution tier
pub struct ContainerManager {
    docker: Option<Docker>,
    store: Arc<dyn ProjectStore>,
    config: ContainerManagerConfig,
    sessions: RwLock<HashMap<ProjectId, Arc<ContainerSession>>>,
    /// Serializes start/stop; same role as the backend supervisor's lock
    start_lock: Mutex<()>,
    ports: PortPool,
    stats: PreviewStats,
    seccomp_path: Option<PathBuf>,
    sweep_cancel: CancellationToken,
}

impl ContainerManager {
    /// Probe the Docker daemon and construct the manager. An unreachable
    /// daemon disables the tier rather than failing construction.
    pub async fn new(store: Arc<dyn ProjectStore>, config: ContainerManagerConfig) -> Self {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::info!("connected to Docker daemon, container previews enabled");
                    Some(docker)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Docker daemon not responding, container previews disabled");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to Docker, container previews disabled");
                None
            }
        };

        Self::with_docker(store, config, docker)
    }

    /// Construct with an explicit (possibly absent) Docker client
    pub fn with_docker(
        store: Arc<dyn ProjectStore>,
        config: ContainerManagerConfig,
        docker: Option<Docker>,
    ) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.temp_base) {
            tracing::warn!(dir = %config.temp_base.display(), error = %e, "failed to create temp base directory");
        }

        let seccomp_path = if docker.is_some() {
            match write_profile(&config.temp_base.join("seccomp-preview.json")) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "could not write seccomp profile; containers run without it");
                    None
                }
            }
        } else {
            None
        };

        let ports = PortPool::without_bind_probe(
            "container",
            config.port_base,
            config.port_probe_limit,
        );

        Self {
            docker,
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
            start_lock: Mutex::new(()),
            ports,
            stats: PreviewStats::new(),
            seccomp_path,
            sweep_cancel: CancellationToken::new(),
        }
    }

    /// Whether the container tier is enabled
    pub fn is_available(&self) -> bool {
        self.docker.is_some()
    }

    pub fn docker_status(&self) -> DockerStatus {
        DockerStatus {
            available: self.is_available(),
            active_containers: self.stats.active(),
            max_containers: self.config.max_containers,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the periodic reconciliation sweep. Runs until `shutdown()`.
    pub fn start_sweeps(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.config.cleanup_interval;
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "container reconciliation sweep started");
            loop {
                tokio::select! {
                    _ = manager.sweep_cancel.cancelled() => {
                        tracing::info!("container reconciliation sweep stopped");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        manager.orphan_sweep().await;
                        manager.age_sweep().await;
                    }
                }
            }
        })
    }

    /// Start a containerized preview. Idempotent per project: a repeat call
    /// on a live session only refreshes last-access.
    pub async fn start_container_preview(&self, request: &PreviewRequest) -> Result<PreviewStatus> {
        let docker = self.docker.as_ref().ok_or_else(|| {
            AgentError::Unavailable("container preview requires the Docker daemon".to_string())
        })?;

        if self.stats.active() >= self.config.max_containers as i64 {
            return Err(AgentError::ResourceExhausted {
                resource: "containers".to_string(),
                reason: format!(
                    "maximum container limit reached ({})",
                    self.config.max_containers
                ),
            });
        }

        let _guard = self.start_lock.lock().await;
        let project = request.project_id;

        if let Some(existing) = self.sessions.read().await.get(&project).cloned() {
            existing.lifecycle.touch();
            return Ok(existing.preview_status());
        }

        let files = self.store.files(project).await?;

        let work_dir = create_work_dir(&self.config.temp_base, project)?;
        if let Err(e) = materialize(&files, &work_dir).await {
            remove_work_dir(&work_dir, &self.config.temp_base).await;
            return Err(e);
        }

        let framework = request
            .framework
            .unwrap_or_else(|| infer_framework(&files));

        if let Err(e) =
            tokio::fs::write(work_dir.join("Dockerfile"), dockerfile_for(framework)).await
        {
            remove_work_dir(&work_dir, &self.config.temp_base).await;
            return Err(e.into());
        }

        let port = match self.ports.allocate(project).await {
            Ok(port) => port,
            Err(e) => {
                remove_work_dir(&work_dir, &self.config.temp_base).await;
                return Err(e);
            }
        };

        let container_name = format!("vitrine-preview-{}", project);
        let image = format!("{}-{}:latest", self.config.image_prefix, project);

        tracing::info!(
            project = %project,
            framework = %framework,
            image = %image,
            port = port,
            "building preview image"
        );

        let build_started = std::time::Instant::now();
        if let Err(e) = self.build_image(docker, &image, &work_dir).await {
            self.ports.release(project).await;
            remove_work_dir(&work_dir, &self.config.temp_base).await;
            self.stats.record_failed();
            return Err(e);
        }
        self.stats
            .add_build_ms(build_started.elapsed().as_millis() as u64);

        let internal_port = framework.internal_port();
        let container_id = match self
            .run_container(docker, &image, &container_name, port, internal_port)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.ports.release(project).await;
                remove_work_dir(&work_dir, &self.config.temp_base).await;
                // The image was built before the run step failed
                let _ = docker
                    .remove_image(
                        &image,
                        Some(RemoveImageOptions {
                            force: true,
                            ..Default::default()
                        }),
                        None,
                    )
                    .await;
                self.stats.record_failed();
                return Err(e);
            }
        };

        let session = Arc::new(ContainerSession {
            project,
            container_id,
            container_name,
            image,
            port,
            internal_port,
            framework,
            work_dir,
            profile: self.config.profile.clone(),
            lifecycle: Lifecycle::new(),
        });

        self.sessions
            .write()
            .await
            .insert(project, Arc::clone(&session));
        self.stats.record_created();

        // Non-fatal readiness: a slow-starting app is not a broken one
        let stop = session.lifecycle.stop_token();
        let ready = wait_for_port(port, self.config.ready_timeout, READY_POLL_INTERVAL, &stop).await;
        if !ready {
            tracing::warn!(
                project = %project,
                port = port,
                timeout = ?self.config.ready_timeout,
                "container did not confirm readiness; returning session anyway"
            );
        }
        session.lifecycle.set_state(SessionState::Ready);

        tracing::info!(
            project = %project,
            container = %session.container_name,
            port = port,
            "container preview started"
        );
        Ok(session.preview_status())
    }

    /// Stop a containerized preview. Never errors; teardown is best-effort
    /// and always runs to completion.
    pub async fn stop_container_preview(&self, project: ProjectId) {
        let _guard = self.start_lock.lock().await;
        let session = self.sessions.write().await.remove(&project);
        let Some(session) = session else {
            return;
        };

        if session.lifecycle.begin_teardown() {
            self.stats.record_stopped();
            self.stats
                .add_run_ms(session.lifecycle.age().as_millis() as u64);
            self.teardown(&session).await;
            session.lifecycle.set_state(SessionState::Terminated);
        }
    }

    /// Current status; an absent session reports `active: false`
    pub async fn get_status(&self, project: ProjectId) -> PreviewStatus {
        let sessions = self.sessions.read().await;
        match sessions.get(&project) {
            Some(session) => session.preview_status(),
            None => PreviewStatus::inactive(project),
        }
    }

    /// Status of every live container session
    pub async fn all_previews(&self) -> Vec<PreviewStatus> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|s| s.preview_status()).collect()
    }

    /// Rewrite changed files into a running session's work directory
    pub async fn refresh(&self, project: ProjectId, changed: &[String]) -> Result<()> {
        let session = self.sessions.read().await.get(&project).cloned();
        let Some(session) = session else {
            return Ok(());
        };

        let files = self.store.files(project).await?;
        let changed: HashSet<&str> = changed.iter().map(String::as_str).collect();
        let subset: Vec<ProjectFile> = files
            .into_iter()
            .filter(|f| changed.contains(f.path.as_str()))
            .collect();

        if let Err(e) = materialize(&subset, &session.work_dir).await {
            tracing::warn!(project = %project, error = %e, "failed to refresh preview files");
        }
        Ok(())
    }

    /// Close sessions idle past the threshold
    pub async fn cleanup_idle(&self, max_idle: Duration) {
        let idle: Vec<ProjectId> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| s.lifecycle.idle_for() > max_idle)
                .map(|(id, _)| *id)
                .collect()
        };
        for project in idle {
            tracing::info!(project = %project, "closing idle container session");
            self.stop_container_preview(project).await;
        }
    }

    /// Stop the sweep, tear down every session, and remove the temp base
    pub async fn shutdown(&self) {
        self.sweep_cancel.cancel();

        let sessions: Vec<Arc<ContainerSession>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            if session.lifecycle.begin_teardown() {
                self.stats.record_stopped();
                self.teardown(&session).await;
                session.lifecycle.set_state(SessionState::Terminated);
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.config.temp_base).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(error = %e, "failed to remove container temp base");
            }
        }
    }

    /// Remove containers carrying the preview label that the registry does
    /// not know about; they survive orchestrator crashes.
    async fn orphan_sweep(&self) {
        let Some(docker) = self.docker.as_ref() else {
            return;
        };

        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", PREVIEW_LABEL)]);
        let listed = match docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: Some(filters),
                ..Default::default()
            }))
            .await
        {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(error = %e, "orphan sweep could not list containers");
                return;
            }
        };

        let tracked: HashSet<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .map(|s| s.container_name.clone())
                .collect()
        };

        let listed_names: Vec<String> = listed
            .iter()
            .flat_map(|c| c.names.clone().unwrap_or_default())
            .map(|name| name.trim_start_matches('/').to_string())
            .collect();

        for name in select_orphans(listed_names, &tracked) {
            tracing::info!(container = %name, "removing orphaned preview container");
            if let Err(e) = docker
                .remove_container(
                    &name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                tracing::warn!(container = %name, error = %e, "failed to remove orphaned container");
            }
        }
    }

    /// Tear down sessions past their maximum lifetime. Teardown is spawned
    /// so a slow `docker stop` never blocks the sweep loop.
    async fn age_sweep(self: &Arc<Self>) {
        let max_lifetime = self.config.profile.max_lifetime;
        let expired: Vec<Arc<ContainerSession>> = {
            let mut sessions = self.sessions.write().await;
            let projects = expired_projects(&sessions, max_lifetime);
            projects
                .into_iter()
                .filter_map(|project| sessions.remove(&project))
                .collect()
        };

        for session in expired {
            if session.lifecycle.begin_teardown() {
                tracing::info!(
                    project = %session.project,
                    age_secs = session.lifecycle.age().as_secs(),
                    "container session exceeded max lifetime"
                );
                self.stats.record_stopped();
                self.stats.record_timed_out();
                self.stats
                    .add_run_ms(session.lifecycle.age().as_millis() as u64);

                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager.teardown(&session).await;
                    session.lifecycle.set_state(SessionState::Terminated);
                });
            }
        }
    }

    /// Best-effort teardown: every step runs regardless of earlier failures
    async fn teardown(&self, session: &ContainerSession) {
        session.lifecycle.signal_stop();

        if let Some(docker) = self.docker.as_ref() {
            if let Err(e) = docker
                .stop_container(
                    &session.container_name,
                    Some(StopContainerOptions {
                        t: Some(STOP_GRACE_SECS),
                        signal: None,
                    }),
                )
                .await
            {
                tracing::debug!(container = %session.container_name, error = %e, "container stop failed");
            }

            if let Err(e) = docker
                .remove_container(
                    &session.container_name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                tracing::debug!(container = %session.container_name, error = %e, "container remove failed");
            }

            if let Err(e) = docker
                .remove_image(
                    &session.image,
                    Some(RemoveImageOptions {
                        force: true,
                        ..Default::default()
                    }),
                    None,
                )
                .await
            {
                tracing::debug!(image = %session.image, error = %e, "image remove failed");
            }
        }

        remove_work_dir(&session.work_dir, &self.config.temp_base).await;
        self.ports.release(session.project).await;
    }

    /// Build the per-project image with no cache
    async fn build_image(&self, docker: &Docker, image: &str, context_dir: &Path) -> Result<()> {
        let dir = context_dir.to_path_buf();
        let context = tokio::task::spawn_blocking(move || tar_directory(&dir))
            .await
            .map_err(|e| AgentError::Internal(format!("tar task failed: {}", e)))??;

        let options = bollard::query_parameters::BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: Some(image.to_string()),
            nocache: true,
            ..Default::default()
        };

        let mut stream = docker.build_image(options, None, Some(bollard::body_full(context.into())));
        while let Some(message) = stream.next().await {
            match message {
                Ok(info) => {
                    if let Some(error_detail) = info.error_detail {
                        return Err(AgentError::BuildFailed {
                            image: image.to_string(),
                            reason: error_detail.message.unwrap_or_default(),
                        });
                    }
                    if let Some(line) = info.stream {
                        let line = line.trim();
                        if !line.is_empty() {
                            tracing::debug!(image = %image, "build: {}", line);
                        }
                    }
                }
                Err(e) => {
                    return Err(AgentError::BuildFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Create and start the hardened container
    async fn run_container(
        &self,
        docker: &Docker,
        image: &str,
        container_name: &str,
        host_port: u16,
        internal_port: u16,
    ) -> Result<String> {
        let host_config = self.build_host_config(host_port, internal_port);

        let mut labels = HashMap::new();
        labels.insert(PREVIEW_LABEL.to_string(), "true".to_string());
        labels.insert(PROJECT_LABEL.to_string(), container_name.to_string());

        let body = bollard::models::ContainerCreateBody {
            image: Some(image.to_string()),
            exposed_ports: Some(vec![format!("{}/tcp", internal_port)]),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(container_name.to_string()),
            platform: String::new(),
        };

        let created = docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| AgentError::StartFailed {
                id: container_name.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = docker
            .start_container(container_name, None::<StartContainerOptions>)
            .await
        {
            // Roll the created container back so a retry gets a clean slate
            let _ = docker
                .remove_container(
                    container_name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(AgentError::StartFailed {
                id: container_name.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(created.id)
    }

    /// Resource ceilings and security hardening for one container
    fn build_host_config(&self, host_port: u16, internal_port: u16) -> HostConfig {
        let profile = &self.config.profile;

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            format!("{}/tcp", internal_port),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        let memory = profile.limits.memory_mb * 1024 * 1024;

        let (cap_drop, cap_add) = if profile.security.drop_capabilities {
            (
                Some(vec!["ALL".to_string()]),
                // The one capability a web server binding a low port needs
                Some(vec!["NET_BIND_SERVICE".to_string()]),
            )
        } else {
            (None, None)
        };

        let mut security_opt = Vec::new();
        if profile.security.no_new_privileges {
            security_opt.push("no-new-privileges:true".to_string());
        }
        if profile.security.seccomp {
            if let Some(path) = &self.seccomp_path {
                security_opt.push(format!("seccomp={}", path.display()));
            }
        }

        let tmpfs = profile.security.read_only_root.then(|| {
            let mut mounts = HashMap::new();
            mounts.insert("/tmp".to_string(), "rw,noexec,nosuid,size=64m".to_string());
            mounts.insert("/var/run".to_string(), "rw,noexec,nosuid,size=8m".to_string());
            mounts.insert(
                "/var/cache/nginx".to_string(),
                "rw,noexec,nosuid,size=32m".to_string(),
            );
            mounts
        });

        HostConfig {
            port_bindings: Some(port_bindings),
            memory: Some(memory),
            // Swap pinned to the memory limit disables it entirely
            memory_swap: Some(memory),
            nano_cpus: Some((profile.limits.cpu * 1_000_000_000.0) as i64),
            pids_limit: Some(profile.limits.pids_limit),
            cap_drop,
            cap_add,
            security_opt: (!security_opt.is_empty()).then_some(security_opt),
            readonly_rootfs: Some(profile.security.read_only_root),
            tmpfs,
            network_mode: Some(profile.network_mode.clone()),
            // Previews must never resurrect themselves
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }
    }
}

/// Containers bearing the preview label but unknown to the registry
fn select_orphans(listed: Vec<String>, tracked: &HashSet<String>) -> Vec<String> {
    listed
        .into_iter()
        .filter(|name| !name.is_empty() && !tracked.contains(name))
        .collect()
}

/// Projects whose sessions are older than the maximum lifetime
fn expired_projects(
    sessions: &HashMap<ProjectId, Arc<ContainerSession>>,
    max_lifetime: Duration,
) -> Vec<ProjectId> {
    sessions
        .iter()
        .filter(|(_, s)| s.lifecycle.age() > max_lifetime)
        .map(|(id, _)| *id)
        .collect()
}

/// Tar up a build context directory
fn tar_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    builder.finish()?;
    builder.into_inner().map_err(AgentError::from)
}
