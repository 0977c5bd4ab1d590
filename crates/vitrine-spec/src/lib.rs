//! Vitrine orchestrator configuration
//!
//! This crate provides the types for parsing and validating the preview
//! orchestrator's configuration, plus the small set of types shared between
//! both execution tiers (project ids, frameworks, sandbox profiles).

mod error;
mod types;
mod validate;

pub use error::*;
pub use types::*;
pub use validate::*;

use validator::Validate;

/// Parse an orchestrator config from a YAML string
pub fn from_yaml_str(yaml: &str) -> Result<OrchestratorConfig, SpecError> {
    let config: OrchestratorConfig = serde_yaml::from_str(yaml)?;

    config
        .validate()
        .map_err(|e| SpecError::validation("", e.to_string()))?;

    // Cross-field validation
    validate_pool_disjointness(&config)?;
    validate_timings(&config)?;
    validate_limits(&config)?;

    Ok(config)
}

/// Parse an orchestrator config from a YAML file
pub fn from_yaml_file(path: &std::path::Path) -> Result<OrchestratorConfig, SpecError> {
    let content = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_yaml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = from_yaml_str("{}").unwrap();
        assert_eq!(config.backend_port_base, 9100);
        assert_eq!(config.container_port_base, 10100);
        assert_eq!(config.max_containers, 50);
        assert_eq!(config.sandbox.limits.memory_mb, 256);
        assert!(config.sandbox.security.seccomp);
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
backend_port_base: 20000
container_port_base: 30000
max_containers: 8
container_ready_timeout: 10s
sandbox:
  network_mode: none
  max_lifetime: 10m
  limits:
    memory_mb: 128
"#;
        let config = from_yaml_str(yaml).unwrap();
        assert_eq!(config.backend_port_base, 20000);
        assert_eq!(config.max_containers, 8);
        assert_eq!(
            config.container_ready_timeout,
            std::time::Duration::from_secs(10)
        );
        assert_eq!(config.sandbox.network_mode, "none");
        assert_eq!(config.sandbox.limits.memory_mb, 128);
        // Unspecified limit fields keep their defaults
        assert_eq!(config.sandbox.limits.pids_limit, 100);
    }

    #[test]
    fn test_overlapping_pools_fail_parse() {
        let yaml = r#"
backend_port_base: 9100
container_port_base: 9200
port_probe_limit: 500
"#;
        assert!(from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(from_yaml_str("bogus_field: 1").is_err());
    }

    #[test]
    fn test_framework_family_mapping() {
        assert_eq!(Framework::React.family(), TemplateFamily::Node);
        assert_eq!(Framework::FastApi.family(), TemplateFamily::Python);
        assert_eq!(Framework::Static.family(), TemplateFamily::Static);
        assert_eq!(Framework::Next.internal_port(), 3000);
        assert_eq!(Framework::Django.internal_port(), 5000);
        assert_eq!(Framework::Static.internal_port(), 80);
    }

    #[test]
    fn test_framework_serde_names() {
        let fw: Framework = serde_yaml::from_str("fastapi").unwrap();
        assert_eq!(fw, Framework::FastApi);
        let fw: Framework = serde_yaml::from_str("react").unwrap();
        assert_eq!(fw, Framework::React);
    }
}
