//! Error types for classification, assembly and YAML tooling

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The merged configuration cannot be turned into a machine config
    #[error("Cannot assemble machine config: {reason}")]
    Assembly { reason: String },

    #[error("Invalid patch {source_name}: {message}")]
    InvalidPatch { source_name: String, message: String },

    /// The input stream itself could not be read
    #[error("Cannot classify {}: {source}", path.display())]
    Classification {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Core(#[from] talm_core::CoreError),
}

impl ConfigError {
    pub fn assembly(reason: impl Into<String>) -> Self {
        Self::Assembly {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
