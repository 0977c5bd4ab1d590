//! Ephemeral work directories
//!
//! Project snapshots are materialized into per-session temp directories that
//! are deleted on teardown. Every write is guarded against path traversal:
//! the resolved destination must stay inside the session's directory.

use crate::error::{AgentError, Result};
use crate::store::{FileKind, ProjectFile};
use std::path::{Component, Path, PathBuf};
use vitrine_spec::ProjectId;

/// Normalize a stored project path into a safe relative path.
///
/// Backslashes become slashes; leading `./` and `/` are stripped; empty
/// paths and anything escaping upward resolve to `None`.
pub fn normalize_project_path(path: &str) -> Option<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unified = trimmed.replace('\\', "/");
    let unified = unified
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string();

    let mut cleaned: Vec<&str> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => cleaned.push(part.to_str()?),
            Component::CurDir => {}
            // Any upward step makes the path untrustworthy
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.join("/"))
}

/// Create a fresh work directory for a project under `base`
pub fn create_work_dir(base: &Path, project: ProjectId) -> Result<PathBuf> {
    std::fs::create_dir_all(base)?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("preview-{}-", project))
        .tempdir_in(base)?;
    // Ownership transfers to the session; teardown removes it explicitly
    Ok(dir.keep())
}

/// Write a project snapshot into `root`, rejecting traversal attempts
pub async fn materialize(files: &[ProjectFile], root: &Path) -> Result<()> {
    for file in files {
        if file.kind == FileKind::Directory {
            continue;
        }

        let Some(relative) = normalize_project_path(&file.path) else {
            continue;
        };
        let destination = root.join(&relative);

        // Normalization already removed upward components, so the join must
        // stay inside the root. Check anyway: this is the security boundary.
        if !destination.starts_with(root) {
            return Err(AgentError::Configuration(format!(
                "path traversal detected: {}",
                file.path
            )));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&destination, file.content.as_bytes()).await?;
    }
    Ok(())
}

/// Best-effort removal of a session work directory. Only paths under `base`
/// are removed, so a caller-supplied external directory is never deleted.
pub async fn remove_work_dir(dir: &Path, base: &Path) {
    if !dir.starts_with(base) {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove work directory");
        }
    }
}
