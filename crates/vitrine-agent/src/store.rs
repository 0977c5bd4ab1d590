//! Project file snapshot collaborator
//!
//! The orchestrator never owns project storage; it consumes a snapshot of
//! (path, content, kind) triples from whatever persists projects. The trait
//! is the seam; `MemoryStore` backs tests and embedders that already hold
//! files in memory.

use crate::error::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use vitrine_spec::ProjectId;

/// Whether a snapshot entry is a regular file or a directory marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// One file in a project snapshot
#[derive(Debug, Clone)]
pub struct ProjectFile {
    pub path: String,
    pub content: String,
    pub kind: FileKind,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: FileKind::File,
        }
    }
}

/// Source of project file snapshots
#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    /// Load the full file snapshot for a project
    async fn files(&self, project: ProjectId) -> Result<Vec<ProjectFile>>;
}

/// In-memory project store
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<ProjectId, Vec<ProjectFile>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: ProjectId, files: Vec<ProjectFile>) {
        self.projects.write().await.insert(project, files);
    }
}

#[async_trait::async_trait]
impl ProjectStore for MemoryStore {
    async fn files(&self, project: ProjectId) -> Result<Vec<ProjectFile>> {
        let projects = self.projects.read().await;
        Ok(projects.get(&project).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store
            .insert(
                ProjectId(1),
                vec![ProjectFile::new("index.html", "<html></html>")],
            )
            .await;

        let files = store.files(ProjectId(1)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "index.html");

        // Unknown project yields an empty snapshot, not an error
        assert!(store.files(ProjectId(2)).await.unwrap().is_empty());
    }
}
