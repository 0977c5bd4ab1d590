//! Per-tier TCP port pools
//!
//! Each execution tier draws host ports from its own pool. A pool is a
//! project→port map guarded by its own mutex, so contention on the backend
//! pool never blocks container allocations. Allocation is idempotent per
//! project: the existing assignment is returned until it is released, and an
//! assignment is released exactly when its owning session is torn down.

use crate::error::{AgentError, Result};
use std::collections::HashMap;
use std::net::TcpListener;
use tokio::sync::Mutex;
use vitrine_spec::ProjectId;

/// One independent numeric pool of host ports
pub struct PortPool {
    name: &'static str,
    base: u16,
    /// Scan bound: after this many candidates the pool is declared exhausted
    probe_limit: u16,
    /// Verify candidates with a bind-and-close probe before assigning
    probe_bind: bool,
    assignments: Mutex<HashMap<ProjectId, u16>>,
}

impl PortPool {
    pub fn new(name: &'static str, base: u16, probe_limit: u16) -> Self {
        Self {
            name,
            base,
            probe_limit,
            probe_bind: true,
            assignments: Mutex::new(HashMap::new()),
        }
    }

    /// Pool without the bind probe; used by tests and by pools whose ports
    /// are consumed by an external runtime rather than bound locally.
    pub fn without_bind_probe(name: &'static str, base: u16, probe_limit: u16) -> Self {
        Self {
            probe_bind: false,
            ..Self::new(name, base, probe_limit)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the project's existing assignment, or scan upward from the
    /// pool base for the first unmapped (and bindable) port.
    pub async fn allocate(&self, project: ProjectId) -> Result<u16> {
        let mut assignments = self.assignments.lock().await;

        if let Some(port) = assignments.get(&project) {
            return Ok(*port);
        }

        for offset in 0..self.probe_limit {
            let candidate = self.base + offset;
            if assignments.values().any(|p| *p == candidate) {
                continue;
            }
            if self.probe_bind && !port_is_free(candidate) {
                continue;
            }
            assignments.insert(project, candidate);
            tracing::debug!(pool = self.name, project = %project, port = candidate, "allocated port");
            return Ok(candidate);
        }

        Err(AgentError::ResourceExhausted {
            resource: format!("port pool '{}'", self.name),
            reason: format!(
                "no free port in {}..{} after {} probes",
                self.base,
                self.base as u32 + self.probe_limit as u32,
                self.probe_limit
            ),
        })
    }

    /// Drop the project's assignment; a no-op when none exists
    pub async fn release(&self, project: ProjectId) {
        let mut assignments = self.assignments.lock().await;
        if assignments.remove(&project).is_some() {
            tracing::debug!(pool = self.name, project = %project, "released port");
        }
    }

    /// Current assignment, if any
    pub async fn assigned(&self, project: ProjectId) -> Option<u16> {
        self.assignments.lock().await.get(&project).copied()
    }

    pub async fn assigned_count(&self) -> usize {
        self.assignments.lock().await.len()
    }
}

/// Bind-and-close probe on the wildcard address
fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_allocate_is_idempotent() {
        let pool = PortPool::without_bind_probe("test", 42000, 100);
        let first = pool.allocate(ProjectId(7)).await.unwrap();
        let second = pool.allocate(ProjectId(7)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.assigned_count().await, 1);
    }

    #[tokio::test]
    async fn test_assignments_are_disjoint() {
        let pool = PortPool::without_bind_probe("test", 42000, 100);
        let a = pool.allocate(ProjectId(1)).await.unwrap();
        let b = pool.allocate(ProjectId(2)).await.unwrap();
        let c = pool.allocate(ProjectId(3)).await.unwrap();
        let unique: HashSet<u16> = [a, b, c].into_iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_release_then_reallocate() {
        let pool = PortPool::without_bind_probe("test", 42000, 100);
        let first = pool.allocate(ProjectId(1)).await.unwrap();
        pool.release(ProjectId(1)).await;
        assert_eq!(pool.assigned(ProjectId(1)).await, None);

        // The freed number is available again
        let second = pool.allocate(ProjectId(2)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_release_absent_is_noop() {
        let pool = PortPool::without_bind_probe("test", 42000, 100);
        pool.release(ProjectId(99)).await;
        assert_eq!(pool.assigned_count().await, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_is_bounded() {
        let pool = PortPool::without_bind_probe("tiny", 42000, 3);
        pool.allocate(ProjectId(1)).await.unwrap();
        pool.allocate(ProjectId(2)).await.unwrap();
        pool.allocate(ProjectId(3)).await.unwrap();

        let err = pool.allocate(ProjectId(4)).await.unwrap_err();
        assert!(matches!(err, AgentError::ResourceExhausted { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_never_collide() {
        let pool = Arc::new(PortPool::without_bind_probe("test", 43000, 200));
        let mut handles = Vec::new();
        for id in 0..50u64 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(
                async move { pool.allocate(ProjectId(id)).await },
            ));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let port = handle.await.unwrap().unwrap();
            assert!(seen.insert(port), "port {} assigned twice", port);
        }
    }

    #[tokio::test]
    async fn test_bind_probe_skips_held_port() {
        // Hold the base port open so the probing pool must skip it
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let held = listener.local_addr().unwrap().port();

        let pool = PortPool::new("probing", held, 50);
        let port = pool.allocate(ProjectId(1)).await.unwrap();
        assert_ne!(port, held);
        drop(listener);
    }
}
