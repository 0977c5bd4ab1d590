//! Orchestrator errors
//!
//! Start-path errors are returned to the caller after rolling back whatever
//! partial resources were allocated. Teardown errors are never surfaced:
//! they are logged and swallowed, because leaking a port or container is
//! worse than a failed `docker rm`.

use std::time::Duration;
use thiserror::Error;

/// Preview orchestrator errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid or unrecognized configuration (bad launch command, no backend
    /// detected, malformed request)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A bounded resource is used up (container ceiling, port pool)
    #[error("resource exhausted: {resource}: {reason}")]
    ResourceExhausted { resource: String, reason: String },

    /// Image build failed (fatal, unlike best-effort dependency installs)
    #[error("failed to build image '{image}': {reason}")]
    BuildFailed { image: String, reason: String },

    /// Process or container failed to launch
    #[error("failed to start '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    /// Process is alive but never opened its port within the deadline
    #[error("server did not start listening on port {port} within {timeout:?}")]
    ReadinessTimeout { port: u16, timeout: Duration },

    /// Process died before its port opened; carries the captured stderr tail
    #[error("server process exited before becoming ready: {stderr}")]
    ExitedBeforeReady { stderr: String },

    /// The container runtime is not reachable; the container tier is disabled
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// Project-store collaborator failure
    #[error("project store error: {0}")]
    Store(String),

    /// Docker Engine API failure
    #[error("docker error: {0}")]
    Docker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Internal orchestrator error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bollard::errors::Error> for AgentError {
    fn from(err: bollard::errors::Error) -> Self {
        AgentError::Docker(err.to_string())
    }
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
