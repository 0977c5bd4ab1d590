//! Vitrine agent - preview execution and sandbox orchestration
//!
//! Gives each project a live, network-reachable preview of running code in a
//! multi-tenant environment. Two execution tiers share one session-lifecycle
//! contract:
//!
//! - **Backend process tier** ([`ServerSupervisor`]): detects a project's
//!   language/framework, materializes files into an ephemeral work dir,
//!   installs dependencies best-effort, launches the server in its own
//!   process group through the [`ProcessRuntime`] strategy, captures bounded
//!   output, and waits for TCP readiness.
//! - **Container tier** ([`ContainerManager`]): builds a per-project image
//!   from a framework template and launches it with hard resource limits,
//!   a seccomp profile, a read-only root, and dropped capabilities, with
//!   periodic reconciliation of orphaned and expired containers.
//!
//! Ports come from per-tier [`PortPool`]s, sessions are torn down in a fixed
//! order that always completes, and both tiers are reachable through the
//! [`PreviewFactory`].

pub mod container;
pub mod detect;
pub mod error;
pub mod factory;
pub mod output;
pub mod ports;
pub mod process;
pub mod readiness;
pub mod seccomp;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod templates;
pub mod workdir;

pub use container::{
    ContainerManager, ContainerManagerConfig, ContainerSession, DockerStatus, PREVIEW_LABEL,
    PROJECT_LABEL,
};
pub use detect::{detect_backend, infer_framework, BackendDetection};
pub use error::*;
pub use factory::PreviewFactory;
pub use output::{OutputBuffer, MAX_CAPTURE_BYTES, TRIM_TO_BYTES};
pub use ports::PortPool;
pub use process::{
    classify_exit, ExitClass, HostRuntime, ProcessHandle, ProcessRuntime, ProcessSignaler,
    ProcessStartConfig,
};
pub use readiness::{probe_port, wait_for_port};
pub use seccomp::{default_profile, write_profile, SeccompProfile, SyscallRule};
pub use server::{
    BackendSession, ExitInfo, ServerLogs, ServerStatus, ServerSupervisor, ServerSupervisorConfig,
};
pub use session::{Lifecycle, PreviewStatus, SessionState};
pub use stats::{PreviewStats, StatsSnapshot};
pub use store::{FileKind, MemoryStore, ProjectFile, ProjectStore};
pub use templates::dockerfile_for;

/// Check whether the Docker daemon is reachable
///
/// Connects with platform defaults and pings; used by embedders to decide
/// whether the container tier can be offered at all.
pub async fn is_docker_available() -> bool {
    use bollard::Docker;

    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => {
                tracing::debug!("Docker daemon is available");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Docker daemon ping failed");
                false
            }
        },
        Err(e) => {
            tracing::debug!(error = %e, "failed to connect to Docker daemon");
            false
        }
    }
}
