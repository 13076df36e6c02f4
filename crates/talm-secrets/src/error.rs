//! Secrets store errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretsError {
    /// Never recovered from by falling back to plaintext
    #[error("Cannot decrypt {}: {reason}", path.display())]
    Decryption { path: PathBuf, reason: String },

    #[error("Invalid age key: {message}")]
    InvalidKey { message: String },

    #[error("Key file not found: {}", path.display())]
    KeyNotFound { path: PathBuf },

    #[error("Encryption failed: {message}")]
    Encryption { message: String },

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Core(#[from] talm_core::CoreError),
}

impl SecretsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decryption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decryption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach a path to a decryption error raised on an in-memory tree
    pub fn at(self, file: impl Into<PathBuf>) -> Self {
        match self {
            Self::Decryption { path, reason } if path.as_os_str().is_empty() => Self::Decryption {
                path: file.into(),
                reason,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SecretsError>;
