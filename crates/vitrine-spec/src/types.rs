//! Orchestrator configuration and shared preview types

mod duration {
    /// Serde module for required (non-Option) Duration fields, using
    /// humantime notation ("30s", "5m", "1h 30m").
    pub mod required {
        use humantime::format_duration;
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&format_duration(*duration).to_string())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            use serde::de::Error;
            let s: String = String::deserialize(deserializer)?;
            humantime::parse_duration(&s)
                .map_err(|e| D::Error::custom(format!("invalid duration: {}", e)))
        }
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Identifier of a user project. One preview session may exist per project
/// per execution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        ProjectId(0)
    }
}

/// Frontend/backend framework detected from project files. Determines which
/// container build template and internal port a preview uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    React,
    Vue,
    Svelte,
    Next,
    Nuxt,
    Flask,
    Django,
    #[serde(rename = "fastapi")]
    FastApi,
    /// Plain HTML/CSS/JS, also the fallback for anything unrecognized
    #[default]
    Static,
}

/// Which build template family a framework maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    Node,
    Python,
    Static,
}

impl Framework {
    /// Template family used for the container image
    pub fn family(&self) -> TemplateFamily {
        match self {
            Framework::React
            | Framework::Vue
            | Framework::Svelte
            | Framework::Next
            | Framework::Nuxt => TemplateFamily::Node,
            Framework::Flask | Framework::Django | Framework::FastApi => TemplateFamily::Python,
            Framework::Static => TemplateFamily::Static,
        }
    }

    /// Port the containerized server listens on inside the container
    pub fn internal_port(&self) -> u16 {
        match self.family() {
            TemplateFamily::Node => 3000,
            TemplateFamily::Python => 5000,
            TemplateFamily::Static => 80,
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Svelte => "svelte",
            Framework::Next => "next",
            Framework::Nuxt => "nuxt",
            Framework::Flask => "flask",
            Framework::Django => "django",
            Framework::FastApi => "fastapi",
            Framework::Static => "static",
        };
        write!(f, "{}", s)
    }
}

/// Backend server ecosystem detected from manifest files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Node,
    Python,
    Go,
    Rust,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerType::Node => "node",
            ServerType::Python => "python",
            ServerType::Go => "go",
            ServerType::Rust => "rust",
        };
        write!(f, "{}", s)
    }
}

/// Hard resource ceilings applied to a sandboxed container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    /// Memory limit in MB; swap is pinned to the same value (disabled)
    #[serde(default = "default_memory_mb")]
    pub memory_mb: i64,
    /// CPU share ceiling as a fraction of one core (0.5 = half a core)
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    /// Maximum number of processes inside the container
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
}

fn default_memory_mb() -> i64 {
    256
}

fn default_cpu() -> f64 {
    0.5
}

fn default_pids_limit() -> i64 {
    100
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            cpu: default_cpu(),
            pids_limit: default_pids_limit(),
        }
    }
}

/// Isolation flags applied to every sandboxed container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityOpts {
    /// Apply the generated seccomp syscall filter
    #[serde(default = "default_true")]
    pub seccomp: bool,
    /// Mount the root filesystem read-only, with small writable tmpfs mounts
    #[serde(default = "default_true")]
    pub read_only_root: bool,
    /// Drop all capabilities, re-adding only NET_BIND_SERVICE
    #[serde(default = "default_true")]
    pub drop_capabilities: bool,
    /// Set the no-new-privileges flag
    #[serde(default = "default_true")]
    pub no_new_privileges: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SecurityOpts {
    fn default() -> Self {
        Self {
            seccomp: true,
            read_only_root: true,
            drop_capabilities: true,
            no_new_privileges: true,
        }
    }
}

/// Full security profile snapshot attached to a container session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxProfile {
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub security: SecurityOpts,
    /// Docker network mode ("bridge" for previews, "none" to isolate fully)
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
    /// Hard maximum lifetime before the age sweep tears the session down
    #[serde(default = "default_max_lifetime", with = "duration::required")]
    pub max_lifetime: Duration,
}

fn default_network_mode() -> String {
    "bridge".to_string()
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            security: SecurityOpts::default(),
            network_mode: default_network_mode(),
            max_lifetime: default_max_lifetime(),
        }
    }
}

/// Per-request configuration for starting a preview
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub project_id: ProjectId,
    /// Framework override; inferred from project files when absent
    #[serde(default)]
    pub framework: Option<Framework>,
    /// Backend entry file override; detected when absent
    #[serde(default)]
    pub entry_file: Option<String>,
    /// Backend launch command override; detected when absent
    #[serde(default)]
    pub command: Option<String>,
    /// Extra environment variables for the backend process
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Pre-materialized work directory; a fresh temp dir is created when absent
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

/// Top-level orchestrator configuration, loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// First port of the backend-process pool
    #[serde(default = "default_backend_port_base")]
    pub backend_port_base: u16,

    /// First port of the container pool; must not overlap the backend pool
    #[serde(default = "default_container_port_base")]
    pub container_port_base: u16,

    /// Upper bound on the allocation scan within a pool; allocation fails
    /// once this many candidate ports have been probed
    #[validate(range(min = 1))]
    #[serde(default = "default_port_probe_limit")]
    pub port_probe_limit: u16,

    /// Concurrent-container ceiling; starts are rejected at the limit
    #[validate(range(min = 1))]
    #[serde(default = "default_max_containers")]
    pub max_containers: u32,

    /// Reconciliation sweep interval
    #[serde(default = "default_cleanup_interval", with = "duration::required")]
    pub cleanup_interval: Duration,

    /// Idle threshold after which a session with no consumers is closed
    #[serde(default = "default_idle_timeout", with = "duration::required")]
    pub idle_timeout: Duration,

    /// TCP readiness deadline for container previews (non-fatal on expiry)
    #[serde(default = "default_container_ready_timeout", with = "duration::required")]
    pub container_ready_timeout: Duration,

    /// TCP readiness deadline for backend processes (fatal on expiry)
    #[serde(default = "default_backend_ready_timeout", with = "duration::required")]
    pub backend_ready_timeout: Duration,

    /// Grace window between SIGTERM and SIGKILL on backend stop
    #[serde(default = "default_stop_grace", with = "duration::required")]
    pub stop_grace: Duration,

    /// Time bound on each best-effort dependency install
    #[serde(default = "default_install_timeout", with = "duration::required")]
    pub install_timeout: Duration,

    /// Image tag prefix for built preview images
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Base directory for ephemeral work directories and the seccomp profile
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Default sandbox profile applied to container previews
    #[serde(default)]
    pub sandbox: SandboxProfile,
}

fn default_backend_port_base() -> u16 {
    9100
}

fn default_container_port_base() -> u16 {
    10100
}

fn default_port_probe_limit() -> u16 {
    1000
}

fn default_max_containers() -> u32 {
    50
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_container_ready_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backend_ready_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_install_timeout() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_image_prefix() -> String {
    "vitrine-preview".to_string()
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("vitrine-previews")
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_port_base: default_backend_port_base(),
            container_port_base: default_container_port_base(),
            port_probe_limit: default_port_probe_limit(),
            max_containers: default_max_containers(),
            cleanup_interval: default_cleanup_interval(),
            idle_timeout: default_idle_timeout(),
            container_ready_timeout: default_container_ready_timeout(),
            backend_ready_timeout: default_backend_ready_timeout(),
            stop_grace: default_stop_grace(),
            install_timeout: default_install_timeout(),
            image_prefix: default_image_prefix(),
            temp_dir: default_temp_dir(),
            sandbox: SandboxProfile::default(),
        }
    }
}
