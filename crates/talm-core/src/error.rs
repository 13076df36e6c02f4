//! Core error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    InvalidChart { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to access {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid version contract '{contract}': {message}")]
    InvalidContract { contract: String, message: String },

    #[error("Unknown machine type '{0}' (expected controlplane or worker)")]
    UnknownMachineType(String),

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },

    #[error(transparent)]
    Modeline(#[from] ModelineError),

    #[error("Secrets bundle error: {message}")]
    SecretsBundle { message: String },
}

impl CoreError {
    /// Wrap an IO error with the path that caused it
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

/// Errors from decoding a modeline header
///
/// `NotFound` is recoverable: callers fall back to explicit flags.
/// `Malformed` means a modeline is present but cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelineError {
    #[error("no modeline found")]
    NotFound,

    #[error("malformed modeline: {reason}")]
    Malformed { reason: String },
}

impl ModelineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
