//! Backend process supervisor
//!
//! Runs a project's detected backend server (Node, Python, Go, Rust) as a
//! supervised host process: detection, file materialization, best-effort
//! dependency install, launch through the runtime abstraction, bounded
//! output capture, TCP readiness, and deterministic teardown.
//!
//! Start calls serialize through one supervisor-wide lock so two concurrent
//! starts never race on port or registry mutation. Teardown always runs the
//! same order (stop signal, kill, port release, work-dir deletion, registry
//! removal) regardless of which step fails.

use crate::detect::{detect_backend, BackendDetection};
use crate::error::{AgentError, Result};
use crate::output::{spawn_pump, OutputBuffer};
use crate::ports::PortPool;
use crate::process::{
    classify_exit, HostRuntime, ProcessRuntime, ProcessSignaler, ProcessStartConfig,
};
use crate::readiness::wait_for_port;
use crate::session::{Lifecycle, PreviewStatus, SessionState};
use crate::store::ProjectStore;
use crate::workdir::{create_work_dir, materialize, remove_work_dir};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use vitrine_spec::{OrchestratorConfig, PreviewRequest, ProjectId};

/// Readiness poll cadence
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Lines returned per stream by `logs()`
const LOG_TAIL_LINES: usize = 1000;
/// Install output is truncated to this many characters in the logs
const INSTALL_LOG_LIMIT: usize = 400;

/// Supervisor tuning, derived from [`OrchestratorConfig`]
#[derive(Debug, Clone)]
pub struct ServerSupervisorConfig {
    pub port_base: u16,
    pub port_probe_limit: u16,
    /// Readiness deadline; generous because `go run`/`cargo run` compile first
    pub ready_timeout: Duration,
    /// Grace window between SIGTERM and SIGKILL
    pub stop_grace: Duration,
    /// Bound on each dependency install attempt
    pub install_timeout: Duration,
    /// Base directory for ephemeral work directories
    pub temp_base: PathBuf,
}

impl Default for ServerSupervisorConfig {
    fn default() -> Self {
        Self::from_orchestrator(&OrchestratorConfig::default())
    }
}

impl ServerSupervisorConfig {
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            port_base: config.backend_port_base,
            port_probe_limit: config.port_probe_limit,
            ready_timeout: config.backend_ready_timeout,
            stop_grace: config.stop_grace,
            install_timeout: config.install_timeout,
            temp_base: config.temp_dir.join("backends"),
        }
    }
}

/// Exit record written by the exit watcher
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub code: i32,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

/// One supervised backend server
#[derive(Debug)]
pub struct BackendSession {
    pub project: ProjectId,
    pub command: String,
    pub args: Vec<String>,
    pub entry_file: String,
    pub port: u16,
    pub pid: u32,
    pub url: String,
    pub runtime_kind: &'static str,
    pub work_dir: PathBuf,
    owns_work_dir: bool,
    lifecycle: Lifecycle,
    ready: AtomicBool,
    exit: StdMutex<Option<ExitInfo>>,
    exited: CancellationToken,
    signaler: ProcessSignaler,
    stdout: Arc<OutputBuffer>,
    stderr: Arc<OutputBuffer>,
}

impl BackendSession {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.lock().expect("exit lock poisoned").clone()
    }

    pub fn preview_status(&self) -> PreviewStatus {
        if self.exit_info().is_some() {
            return PreviewStatus::inactive(self.project);
        }
        PreviewStatus::active(self.project, self.port, &self.lifecycle)
    }
}

/// Detailed status of one backend server
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entry_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}

/// Captured output tails
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Supervisor for the backend-process execution tier
pub struct ServerSupervisor {
    store: Arc<dyn ProjectStore>,
    runtime: Arc<dyn ProcessRuntime>,
    config: ServerSupervisorConfig,
    ports: PortPool,
    sessions: RwLock<HashMap<ProjectId, Arc<BackendSession>>>,
    /// Serializes start/stop so a stop arriving mid-start can never observe
    /// a half-created session
    start_lock: Mutex<()>,
}

impl ServerSupervisor {
    /// Supervisor with the default host runtime
    pub fn new(store: Arc<dyn ProjectStore>, config: ServerSupervisorConfig) -> Self {
        Self::with_runtime(store, Arc::new(HostRuntime), config)
    }

    /// Supervisor with a custom runtime backend
    pub fn with_runtime(
        store: Arc<dyn ProjectStore>,
        runtime: Arc<dyn ProcessRuntime>,
        config: ServerSupervisorConfig,
    ) -> Self {
        let ports = PortPool::new("backend", config.port_base, config.port_probe_limit);
        Self {
            store,
            runtime,
            config,
            ports,
            sessions: RwLock::new(HashMap::new()),
            start_lock: Mutex::new(()),
        }
    }

    /// Auto-detect the project's backend server configuration
    pub async fn detect(&self, project: ProjectId) -> Result<BackendDetection> {
        let files = self.store.files(project).await?;
        Ok(detect_backend(&files))
    }

    /// Start a backend server for the project. Idempotent: a second call on
    /// a ready, live session only refreshes last-access.
    pub async fn start(&self, request: &PreviewRequest) -> Result<Arc<BackendSession>> {
        let _guard = self.start_lock.lock().await;
        let project = request.project_id;

        if let Some(existing) = self.sessions.read().await.get(&project).cloned() {
            if existing.is_ready() && existing.exit_info().is_none() {
                existing.lifecycle.touch();
                tracing::debug!(project = %project, "backend already running");
                return Ok(existing);
            }
            // Stale entry: exited or never became ready
            self.stop_locked(project).await;
        }

        let files = self.store.files(project).await?;

        let (command, entry_file) = if request.command.is_none() || request.entry_file.is_none() {
            let detection = detect_backend(&files);
            if !detection.has_backend {
                return Err(AgentError::Configuration(
                    "no backend server detected in project".to_string(),
                ));
            }
            (
                request.command.clone().unwrap_or(detection.command),
                request.entry_file.clone().unwrap_or(detection.entry_file),
            )
        } else {
            (
                request.command.clone().unwrap_or_default(),
                request.entry_file.clone().unwrap_or_default(),
            )
        };

        let port = self.ports.allocate(project).await?;

        let (work_dir, owns_work_dir) = match &request.work_dir {
            Some(dir) => (dir.clone(), false),
            None => {
                let dir = match create_work_dir(&self.config.temp_base, project) {
                    Ok(dir) => dir,
                    Err(e) => {
                        self.ports.release(project).await;
                        return Err(e);
                    }
                };
                if let Err(e) = materialize(&files, &dir).await {
                    self.ports.release(project).await;
                    remove_work_dir(&dir, &self.config.temp_base).await;
                    return Err(e);
                }
                // Best-effort: the server may still start from artifacts
                // that already exist (node_modules, compiled output)
                self.install_dependencies(&dir).await;
                (dir, true)
            }
        };

        let rollback_dir = owns_work_dir.then(|| work_dir.clone());

        let (program, args) = match build_launch_command(&command, &entry_file, port) {
            Ok(parts) => parts,
            Err(e) => {
                self.rollback_start(project, rollback_dir.as_deref()).await;
                return Err(e);
            }
        };

        let env = build_env(port, &request.env);
        tracing::info!(
            project = %project,
            command = %program,
            args = ?args,
            port = port,
            "starting backend server"
        );

        let mut handle = match self
            .runtime
            .start_process(&ProcessStartConfig {
                command: program,
                args: args.clone(),
                dir: work_dir.clone(),
                env,
            })
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.rollback_start(project, rollback_dir.as_deref()).await;
                return Err(e);
            }
        };

        let lifecycle = Lifecycle::new();
        let stop = lifecycle.stop_token();
        let exited = CancellationToken::new();
        let stdout = Arc::new(OutputBuffer::new());
        let stderr = Arc::new(OutputBuffer::new());

        if let Some(pipe) = handle.stdout.take() {
            spawn_pump(pipe, Arc::clone(&stdout), stop.clone());
        }
        if let Some(pipe) = handle.stderr.take() {
            spawn_pump(pipe, Arc::clone(&stderr), stop.clone());
        }

        let session = Arc::new(BackendSession {
            project,
            command,
            args,
            entry_file,
            port,
            pid: handle.pid,
            url: format!("http://127.0.0.1:{}", port),
            runtime_kind: handle.backend(),
            work_dir: work_dir.clone(),
            owns_work_dir,
            lifecycle,
            ready: AtomicBool::new(false),
            exit: StdMutex::new(None),
            exited: exited.clone(),
            signaler: handle.signaler(),
            stdout,
            stderr,
        });

        // Exit watcher: records the outcome and wakes every waiter
        {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let (code, error) = handle.wait().await;
                session.ready.store(false, Ordering::SeqCst);
                *session.exit.lock().expect("exit lock poisoned") = Some(ExitInfo {
                    code,
                    at: Utc::now(),
                    error: error.clone(),
                });
                let outcome = classify_exit(code, error.as_deref());
                tracing::info!(
                    project = %session.project,
                    exit_code = code,
                    outcome = %outcome,
                    "backend process exited"
                );
                // exited fires before the stop token so a readiness waiter
                // woken by the stop can already observe the exit
                session.exited.cancel();
                session.lifecycle.signal_stop();
            });
        }

        let ready = wait_for_port(port, self.config.ready_timeout, READY_POLL_INTERVAL, &stop).await;

        if !ready {
            if exited.is_cancelled() {
                self.rollback_start(project, rollback_dir.as_deref()).await;
                return Err(AgentError::ExitedBeforeReady {
                    stderr: session.stderr.tail_lines(LOG_TAIL_LINES),
                });
            }
            // Alive but the port never opened
            self.kill_session(&session).await;
            self.rollback_start(project, rollback_dir.as_deref()).await;
            return Err(AgentError::ReadinessTimeout {
                port,
                timeout: self.config.ready_timeout,
            });
        }

        session.ready.store(true, Ordering::SeqCst);
        session.lifecycle.set_state(SessionState::Ready);
        self.sessions
            .write()
            .await
            .insert(project, Arc::clone(&session));

        tracing::info!(project = %project, port = port, pid = session.pid, "backend server ready");
        Ok(session)
    }

    /// Stop the project's backend server. Never errors; stopping an absent
    /// session is a no-op.
    pub async fn stop(&self, project: ProjectId) {
        let _guard = self.start_lock.lock().await;
        self.stop_locked(project).await;
    }

    /// Stop every running backend server
    pub async fn stop_all(&self) {
        let _guard = self.start_lock.lock().await;
        let projects: Vec<ProjectId> = self.sessions.read().await.keys().copied().collect();
        for project in projects {
            self.stop_locked(project).await;
        }
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
            tracing::info!(project = %project, "closing idle backend session");
            self.stop(project).await;
        }
    }

    /// Current status; an absent session reports `running: false`
    pub async fn status(&self, project: ProjectId) -> ServerStatus {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(&project) else {
            return ServerStatus::default();
        };

        let exit = session.exit_info();
        let running = exit.is_none();
        ServerStatus {
            running,
            ready: session.is_ready() && running,
            port: Some(session.port),
            pid: Some(session.pid),
            uptime_seconds: session.lifecycle.age().as_secs(),
            command: session.command.clone(),
            entry_file: session.entry_file.clone(),
            url: session.url.clone(),
            started_at: Some(session.lifecycle.started_at()),
            exited_at: exit.as_ref().map(|e| e.at),
            exit_code: exit.as_ref().map(|e| e.code),
            last_error: exit.and_then(|e| e.error).unwrap_or_default(),
        }
    }

    /// Captured output tails; empty for an absent session
    pub async fn logs(&self, project: ProjectId) -> ServerLogs {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(&project) else {
            return ServerLogs::default();
        };
        ServerLogs {
            stdout: session.stdout.tail_lines(LOG_TAIL_LINES),
            stderr: session.stderr.tail_lines(LOG_TAIL_LINES),
        }
    }

    /// The live, ready session for a project (for reverse-proxy wiring)
    pub async fn get_process(&self, project: ProjectId) -> Option<Arc<BackendSession>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&project)?;
        if session.is_ready() && session.exit_info().is_none() {
            Some(Arc::clone(session))
        } else {
            None
        }
    }

    /// Status of every live backend session
    pub async fn all_previews(&self) -> Vec<PreviewStatus> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|s| s.preview_status()).collect()
    }

    /// Status payload in the shared cross-tier shape
    pub async fn preview_status(&self, project: ProjectId) -> PreviewStatus {
        let sessions = self.sessions.read().await;
        match sessions.get(&project) {
            Some(session) => session.preview_status(),
            None => PreviewStatus::inactive(project),
        }
    }

    /// Undo partial start-path allocations before surfacing an error
    async fn rollback_start(&self, project: ProjectId, work_dir: Option<&Path>) {
        self.ports.release(project).await;
        if let Some(dir) = work_dir {
            remove_work_dir(dir, &self.config.temp_base).await;
        }
    }

    /// Teardown under the supervisor lock, in the fixed order
    async fn stop_locked(&self, project: ProjectId) {
        let session = self.sessions.read().await.get(&project).cloned();
        let Some(session) = session else {
            return;
        };

        if session.lifecycle.begin_teardown() {
            self.kill_session(&session).await;
            self.ports.release(project).await;
            if session.owns_work_dir {
                remove_work_dir(&session.work_dir, &self.config.temp_base).await;
            }
            session.lifecycle.set_state(SessionState::Terminated);
            tracing::info!(project = %project, "backend session terminated");
        }
        self.sessions.write().await.remove(&project);
    }

    /// Graceful termination, bounded by the grace window, then SIGKILL
    async fn kill_session(&self, session: &BackendSession) {
        session.lifecycle.signal_stop();
        if session.exit_info().is_some() {
            return;
        }

        session.signaler.signal_stop();
        let grace = self.config.stop_grace;
        if tokio::time::timeout(grace, session.exited.cancelled())
            .await
            .is_ok()
        {
            return;
        }

        session.signaler.force_kill();
        // SIGKILL cannot be ignored; this wait only covers reaping
        let _ = tokio::time::timeout(grace, session.exited.cancelled()).await;
    }

    /// Best-effort, time-bounded dependency install per ecosystem. Failures
    /// are logged, never fatal.
    async fn install_dependencies(&self, work_dir: &Path) {
        if work_dir.join("package.json").exists() {
            self.run_install(
                work_dir,
                "npm",
                &[
                    "install",
                    "--prefer-offline",
                    "--no-audit",
                    "--no-fund",
                    "--loglevel=error",
                ],
            )
            .await;
        }

        if work_dir.join("requirements.txt").exists() {
            let pip = if binary_exists("pip3").await { "pip3" } else { "pip" };
            self.run_install(
                work_dir,
                pip,
                &[
                    "install",
                    "-r",
                    "requirements.txt",
                    "-q",
                    "--break-system-packages",
                ],
            )
            .await;
        }

        if work_dir.join("go.mod").exists() {
            self.run_install(work_dir, "go", &["mod", "download"]).await;
        }
    }

    async fn run_install(&self, work_dir: &Path, program: &str, args: &[&str]) {
        let mut command = tokio::process::Command::new(program);
        command.args(args).current_dir(work_dir);

        match tokio::time::timeout(self.config.install_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::info!(program = program, dir = %work_dir.display(), "dependency install succeeded");
            }
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                tracing::warn!(
                    program = program,
                    dir = %work_dir.display(),
                    status = %output.status,
                    output = %truncate_install_output(&combined),
                    "dependency install failed"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(program = program, error = %e, "dependency install could not run");
            }
            Err(_) => {
                tracing::warn!(
                    program = program,
                    timeout = ?self.config.install_timeout,
                    "dependency install timed out"
                );
            }
        }
    }
}

async fn binary_exists(program: &str) -> bool {
    tokio::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok()
}

fn truncate_install_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() > INSTALL_LOG_LIMIT {
        let mut cut = INSTALL_LOG_LIMIT;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

/// Translate a detected command keyword into an executable and arguments
fn build_launch_command(
    command: &str,
    entry_file: &str,
    port: u16,
) -> Result<(String, Vec<String>)> {
    let parts: (&str, Vec<String>) = match command {
        // `npm run start` handles TypeScript toolchains (ts-node, esbuild,
        // tsc+node) through the project's own scripts
        "npm" => ("npm", vec!["run".into(), "start".into()]),
        "node" => ("node", vec![entry_file.to_string()]),
        "python" => ("python3", vec![entry_file.to_string()]),
        // `python3 -m uvicorn` works even when pip installed with --user
        // and ~/.local/bin is not on PATH
        "uvicorn" => {
            let module = entry_file.trim_end_matches(".py").replace('/', ".");
            (
                "python3",
                vec![
                    "-m".into(),
                    "uvicorn".into(),
                    format!("{}:app", module),
                    "--host".into(),
                    "0.0.0.0".into(),
                    "--port".into(),
                    port.to_string(),
                ],
            )
        }
        "go run" => {
            let target = if entry_file.is_empty() { "." } else { entry_file };
            ("go", vec!["run".into(), target.to_string()])
        }
        "cargo run" => ("cargo", vec!["run".into()]),
        custom => {
            let mut fields = custom.split_whitespace();
            let Some(program) = fields.next() else {
                return Err(AgentError::Configuration(format!(
                    "invalid command: {}",
                    command
                )));
            };
            let mut args: Vec<String> = fields.map(str::to_string).collect();
            if !entry_file.is_empty() {
                args.push(entry_file.to_string());
            }
            return Ok((program.to_string(), args));
        }
    };
    Ok((parts.0.to_string(), parts.1))
}

/// Environment block injecting the assigned port and dev-mode flags
fn build_env(port: u16, extra: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut env = vec![
        ("PORT".to_string(), port.to_string()),
        ("HOST".to_string(), "0.0.0.0".to_string()),
        ("NODE_ENV".to_string(), "development".to_string()),
        ("FLASK_ENV".to_string(), "development".to_string()),
        ("DEBUG".to_string(), "true".to_string()),
    ];
    for (key, value) in extra {
        env.push((key.clone(), value.clone()));
    }
    env
}
