//! Error types for the spec crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when parsing or validating orchestrator configuration
#[derive(Debug, Error)]
pub enum SpecError {
    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Validation error
    #[error("validation error at {path}: {message}")]
    Validation { path: String, message: String },

    /// IO error when reading a config file
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpecError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        SpecError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }
}
