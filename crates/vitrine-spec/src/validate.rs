//! Cross-field validation for orchestrator configuration
//!
//! Field-level checks live on the types via the `validator` derive; the
//! checks here span multiple fields (pool disjointness, timing sanity).

use crate::error::SpecError;
use crate::types::OrchestratorConfig;

/// Each port pool covers `[base, base + port_probe_limit)`. Pools must never
/// share a number, so the two ranges may not overlap.
pub fn validate_pool_disjointness(config: &OrchestratorConfig) -> Result<(), SpecError> {
    let limit = config.port_probe_limit as u32;
    let backend = config.backend_port_base as u32..config.backend_port_base as u32 + limit;
    let container = config.container_port_base as u32..config.container_port_base as u32 + limit;

    if backend.start < container.end && container.start < backend.end {
        return Err(SpecError::validation(
            "container_port_base",
            format!(
                "container pool {}..{} overlaps backend pool {}..{}",
                container.start, container.end, backend.start, backend.end
            ),
        ));
    }

    if backend.end > u16::MAX as u32 + 1 || container.end > u16::MAX as u32 + 1 {
        return Err(SpecError::validation(
            "port_probe_limit",
            "port pool extends past the maximum TCP port",
        ));
    }

    Ok(())
}

/// Zero-length durations would turn the sweeps into busy loops or make every
/// readiness probe fail instantly.
pub fn validate_timings(config: &OrchestratorConfig) -> Result<(), SpecError> {
    let nonzero = [
        ("cleanup_interval", config.cleanup_interval),
        ("idle_timeout", config.idle_timeout),
        ("container_ready_timeout", config.container_ready_timeout),
        ("backend_ready_timeout", config.backend_ready_timeout),
        ("install_timeout", config.install_timeout),
        ("sandbox.max_lifetime", config.sandbox.max_lifetime),
    ];
    for (path, value) in nonzero {
        if value.is_zero() {
            return Err(SpecError::validation(path, "duration must be non-zero"));
        }
    }
    Ok(())
}

pub fn validate_limits(config: &OrchestratorConfig) -> Result<(), SpecError> {
    let limits = &config.sandbox.limits;
    if limits.memory_mb <= 0 {
        return Err(SpecError::validation(
            "sandbox.limits.memory_mb",
            "memory limit must be positive",
        ));
    }
    if limits.cpu <= 0.0 {
        return Err(SpecError::validation(
            "sandbox.limits.cpu",
            "cpu limit must be positive",
        ));
    }
    if limits.pids_limit <= 0 {
        return Err(SpecError::validation(
            "sandbox.limits.pids_limit",
            "pids limit must be positive",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(validate_pool_disjointness(&config).is_ok());
        assert!(validate_timings(&config).is_ok());
        assert!(validate_limits(&config).is_ok());
    }

    #[test]
    fn overlapping_pools_rejected() {
        let config = OrchestratorConfig {
            backend_port_base: 9100,
            container_port_base: 9500,
            port_probe_limit: 1000,
            ..Default::default()
        };
        let err = validate_pool_disjointness(&config).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn pool_past_max_port_rejected() {
        let config = OrchestratorConfig {
            container_port_base: 65500,
            port_probe_limit: 100,
            ..Default::default()
        };
        assert!(validate_pool_disjointness(&config).is_err());
    }

    #[test]
    fn zero_duration_rejected() {
        let mut config = OrchestratorConfig::default();
        config.cleanup_interval = std::time::Duration::ZERO;
        assert!(validate_timings(&config).is_err());
    }

    #[test]
    fn nonpositive_limits_rejected() {
        let mut config = OrchestratorConfig::default();
        config.sandbox.limits.memory_mb = 0;
        assert!(validate_limits(&config).is_err());
    }
}
