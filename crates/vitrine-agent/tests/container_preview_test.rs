//! Container preview integration tests
//!
//! These tests exercise the container tier against a real Docker daemon and
//! are skipped when no daemon is reachable.
//!
//! # Requirements
//! - Docker daemon must be running
//! - Network access to pull the template base images
//!
//! # Running
//! ```bash
//! cargo test -p vitrine-agent --test container_preview_test -- --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;
use vitrine_agent::{
    is_docker_available, ContainerManager, ContainerManagerConfig, MemoryStore, ProjectFile,
};
use vitrine_spec::{PreviewRequest, ProjectId, SandboxProfile};

/// Port range start for this test file, away from the library defaults
const TEST_PORT_BASE: u16 = 52100;

async fn skip_if_no_docker() -> bool {
    if is_docker_available().await {
        return false;
    }
    eprintln!("skipping: Docker daemon not available");
    true
}

fn test_config(temp_base: &std::path::Path) -> ContainerManagerConfig {
    ContainerManagerConfig {
        image_prefix: "vitrine-test".to_string(),
        port_base: TEST_PORT_BASE,
        port_probe_limit: 100,
        max_containers: 4,
        cleanup_interval: Duration::from_secs(60),
        ready_timeout: Duration::from_secs(30),
        temp_base: temp_base.to_path_buf(),
        profile: SandboxProfile::default(),
    }
}

async fn static_project_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store
        .insert(
            ProjectId(9001),
            vec![ProjectFile::new(
                "index.html",
                "<html><body>vitrine integration test</body></html>",
            )],
        )
        .await;
    Arc::new(store)
}

#[tokio::test]
async fn test_static_preview_end_to_end() {
    if skip_if_no_docker().await {
        return;
    }

    let temp = tempfile::tempdir().unwrap();
    let store = static_project_store().await;
    let manager = Arc::new(
        ContainerManager::new(store, test_config(temp.path())).await,
    );
    assert!(manager.is_available());

    let request = PreviewRequest {
        project_id: ProjectId(9001),
        ..Default::default()
    };

    // Static project: no framework supplied, so the static fallback template
    // is selected and the port comes from the container pool
    let status = manager
        .start_container_preview(&request)
        .await
        .expect("container preview should start");
    assert!(status.active);
    let port = status.port.unwrap();
    assert!((TEST_PORT_BASE..TEST_PORT_BASE + 100).contains(&port));
    assert_eq!(
        status.url.as_deref(),
        Some(format!("http://127.0.0.1:{}", port).as_str())
    );

    let stats = manager.stats();
    assert_eq!(stats.total_created, 1);
    assert_eq!(stats.active, 1);

    // Second start is idempotent: same port, advanced last-access
    let first_access = status.last_access.unwrap();
    let again = manager.start_container_preview(&request).await.unwrap();
    assert_eq!(again.port, Some(port));
    assert!(again.last_access.unwrap() >= first_access);
    assert_eq!(manager.stats().total_created, 1);

    // Teardown releases everything
    manager.stop_container_preview(ProjectId(9001)).await;
    let stats = manager.stats();
    assert_eq!(stats.active, 0);
    assert!(!manager.get_status(ProjectId(9001)).await.active);
}

#[tokio::test]
async fn test_shutdown_cleans_tracked_sessions() {
    if skip_if_no_docker().await {
        return;
    }

    let temp = tempfile::tempdir().unwrap();
    let store = static_project_store().await;
    let mut config = test_config(temp.path());
    config.port_base = TEST_PORT_BASE + 200;
    let manager = Arc::new(ContainerManager::new(store, config).await);

    let request = PreviewRequest {
        project_id: ProjectId(9001),
        ..Default::default()
    };
    manager.start_container_preview(&request).await.unwrap();

    manager.shutdown().await;
    assert_eq!(manager.stats().active, 0);
    assert!(manager.all_previews().await.is_empty());
}
