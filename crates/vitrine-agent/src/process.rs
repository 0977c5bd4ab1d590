//! Process runtime abstraction
//!
//! `ProcessRuntime` is the strategy seam for launching backend server
//! processes. The production implementation starts the child directly on the
//! host in its own process group, so graceful/forced termination reaches any
//! grandchildren the server spawns (npm → node, cargo → target binary). A
//! containerized implementation can be substituted behind the same trait.

use crate::error::{AgentError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Launch configuration handed to a runtime backend
#[derive(Debug, Clone)]
pub struct ProcessStartConfig {
    pub command: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Signals the whole process group of a launched child.
///
/// Separate from the handle so the exit watcher can consume the handle while
/// stop paths keep the ability to signal.
#[derive(Debug, Clone, Copy)]
pub struct ProcessSignaler {
    pgid: i32,
}

impl ProcessSignaler {
    /// Graceful termination (SIGTERM) to the process group
    pub fn signal_stop(&self) {
        let _ = killpg(Pid::from_raw(self.pgid), Signal::SIGTERM);
    }

    /// Unconditional termination (SIGKILL) to the process group
    pub fn force_kill(&self) {
        let _ = killpg(Pid::from_raw(self.pgid), Signal::SIGKILL);
    }
}

/// Handle to a launched process
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    signaler: ProcessSignaler,
    backend: &'static str,
    child: Child,
}

impl ProcessHandle {
    pub fn signaler(&self) -> ProcessSignaler {
        self.signaler
    }

    /// Runtime backend tag, for status payloads and logging
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Block until the process exits. Returns the exit code (signal deaths
    /// map to 128+signum) and an error description for non-clean exits.
    pub async fn wait(mut self) -> (i32, Option<String>) {
        match self.child.wait().await {
            Ok(status) => {
                #[cfg(unix)]
                let code = {
                    use std::os::unix::process::ExitStatusExt;
                    match status.code() {
                        Some(code) => code,
                        None => 128 + status.signal().unwrap_or(0),
                    }
                };
                #[cfg(not(unix))]
                let code = status.code().unwrap_or(1);

                if status.success() {
                    (code, None)
                } else {
                    (code, Some(format!("{}", status)))
                }
            }
            Err(e) => (1, Some(e.to_string())),
        }
    }
}

/// Post-exit classification, derived from exit code and error text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Clean,
    Killed,
    Cancelled,
    Error,
}

impl std::fmt::Display for ExitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitClass::Clean => "clean",
            ExitClass::Killed => "killed",
            ExitClass::Cancelled => "cancelled",
            ExitClass::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Classify how a backend process ended. 137/143 are the shell conventions
/// for SIGKILL/SIGTERM deaths.
pub fn classify_exit(exit_code: i32, error: Option<&str>) -> ExitClass {
    let Some(error) = error else {
        return ExitClass::Clean;
    };
    if exit_code == 0 {
        return ExitClass::Clean;
    }
    if exit_code == 137 || exit_code == 143 {
        return ExitClass::Killed;
    }
    let lower = error.to_lowercase();
    if lower.contains("killed") || lower.contains("signal") {
        ExitClass::Killed
    } else if lower.contains("cancel") {
        ExitClass::Cancelled
    } else {
        ExitClass::Error
    }
}

/// Strategy for launching backend server processes
#[async_trait::async_trait]
pub trait ProcessRuntime: Send + Sync {
    /// Backend tag for status payloads and logging
    fn name(&self) -> &'static str;

    /// Create and start a process, wired with piped stdout/stderr
    async fn start_process(&self, cfg: &ProcessStartConfig) -> Result<ProcessHandle>;
}

/// Direct host execution via the OS process table
pub struct HostRuntime;

#[async_trait::async_trait]
impl ProcessRuntime for HostRuntime {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn start_process(&self, cfg: &ProcessStartConfig) -> Result<ProcessHandle> {
        let mut command = Command::new(&cfg.command);
        command
            .args(&cfg.args)
            .current_dir(&cfg.dir)
            .envs(cfg.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        // New process group with pgid == child pid, so group-wide signals
        // reach every descendant
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| AgentError::StartFailed {
            id: cfg.command.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| AgentError::StartFailed {
            id: cfg.command.clone(),
            reason: "process exited before a pid was observed".to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(ProcessHandle {
            pid,
            stdout,
            stderr,
            signaler: ProcessSignaler { pgid: pid as i32 },
            backend: self.name(),
            child,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessStartConfig {
        ProcessStartConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            dir: std::env::temp_dir(),
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_clean_exit() {
        let handle = HostRuntime.start_process(&sh("exit 0")).await.unwrap();
        assert!(handle.pid > 0);
        let (code, error) = handle.wait().await;
        assert_eq!(code, 0);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_error() {
        let handle = HostRuntime.start_process(&sh("exit 3")).await.unwrap();
        let (code, error) = handle.wait().await;
        assert_eq!(code, 3);
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn test_force_kill_terminates_group() {
        let handle = HostRuntime.start_process(&sh("sleep 30")).await.unwrap();
        let signaler = handle.signaler();
        signaler.force_kill();
        let (code, _error) = handle.wait().await;
        assert_eq!(code, 128 + 9);
    }

    #[tokio::test]
    async fn test_missing_command_is_start_failure() {
        let cfg = ProcessStartConfig {
            command: "definitely-not-a-real-binary".to_string(),
            args: Vec::new(),
            dir: std::env::temp_dir(),
            env: Vec::new(),
        };
        let err = HostRuntime.start_process(&cfg).await.unwrap_err();
        assert!(matches!(err, AgentError::StartFailed { .. }));
    }

    #[test]
    fn test_classify_exit() {
        assert_eq!(classify_exit(0, None), ExitClass::Clean);
        assert_eq!(classify_exit(0, Some("exit status 0")), ExitClass::Clean);
        assert_eq!(classify_exit(137, Some("exit status 137")), ExitClass::Killed);
        assert_eq!(classify_exit(143, Some("exit status 143")), ExitClass::Killed);
        assert_eq!(
            classify_exit(1, Some("killed by signal 9")),
            ExitClass::Killed
        );
        assert_eq!(
            classify_exit(1, Some("operation cancelled")),
            ExitClass::Cancelled
        );
        assert_eq!(classify_exit(2, Some("exit status 2")), ExitClass::Error);
    }
}
