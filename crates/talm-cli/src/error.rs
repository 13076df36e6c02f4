//! CLI error type with exit code mapping
//!
//! Library errors are folded into a handful of user-facing categories, each
//! with its own exit code. Template errors keep their full diagnostic
//! (source snippet, span, suggestion).

use miette::Diagnostic;
use thiserror::Error;

use talm_config::ConfigError;
use talm_core::CoreError;
use talm_engine::{EngineError, TemplateError};
use talm_secrets::SecretsError;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    /// Rendering failed outside the template itself (lookups, missing templates)
    #[error("Render failed: {message}")]
    #[diagnostic(code(talm::cli::render))]
    Render {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Render cancelled: {message}")]
    #[diagnostic(code(talm::cli::cancelled))]
    Cancelled { message: String },

    #[error("Invalid input: {message}")]
    #[diagnostic(code(talm::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Chart loading or config assembly
    #[error("Config error: {message}")]
    #[diagnostic(code(talm::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Decryption failed: {message}")]
    #[diagnostic(
        code(talm::cli::decryption),
        help("check that talm.key is the key the file was encrypted with")
    )]
    Decryption { message: String },

    #[error("Secrets error: {message}")]
    #[diagnostic(code(talm::cli::secrets))]
    Secrets {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("IO error: {message}")]
    #[diagnostic(code(talm::cli::io))]
    Io { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Template(_) | CliError::Render { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Cancelled { .. } => exit_codes::CANCELLED,
            CliError::Input { .. } => exit_codes::INPUT_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Decryption { .. } => exit_codes::DECRYPTION_ERROR,
            CliError::Secrets { .. } => exit_codes::ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::io(err.to_string())
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Io(_) | CoreError::File { .. } => CliError::Io { message },
            CoreError::ChartNotFound { .. } | CoreError::InvalidChart { .. } => CliError::Config {
                message,
                help: Some("run talm inside a project containing Chart.yaml, or pass --root".into()),
            },
            CoreError::SecretsBundle { .. } => CliError::Secrets {
                message,
                help: None,
            },
            CoreError::Modeline(_)
            | CoreError::YamlParse(_)
            | CoreError::JsonParse(_)
            | CoreError::InvalidContract { .. }
            | CoreError::UnknownMachineType(_)
            | CoreError::ValuesMerge { .. } => CliError::input(message),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Template(te) => CliError::Template(te),
            EngineError::TemplateNotFound { name } => CliError::Render {
                message: format!("template '{}' not found", name),
                help: Some(
                    "template names are relative to the chart root, e.g. templates/controlplane.yaml"
                        .into(),
                ),
            },
            EngineError::Lookup(e) => CliError::Render {
                message: e.to_string(),
                help: Some("use --offline or --snapshot to render without live node facts".into()),
            },
            EngineError::Cancelled(c) => CliError::Cancelled {
                message: c.to_string(),
            },
            EngineError::Core(e) => e.into(),
            EngineError::Io { path, source } => {
                CliError::io(format!("{}: {}", path.display(), source))
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        let message = err.to_string();
        match err {
            ConfigError::Assembly { .. } => CliError::config(message),
            ConfigError::InvalidPatch { .. } | ConfigError::Yaml(_) => CliError::input(message),
            ConfigError::Classification { .. } => CliError::io(message),
            ConfigError::Core(e) => e.into(),
        }
    }
}

impl From<SecretsError> for CliError {
    fn from(err: SecretsError) -> Self {
        let message = err.to_string();
        match err {
            SecretsError::Decryption { .. } => CliError::Decryption { message },
            SecretsError::KeyNotFound { .. } => CliError::Secrets {
                message,
                help: Some("run `talm encrypt` to create a key, or restore talm.key".into()),
            },
            SecretsError::InvalidKey { .. } | SecretsError::Encryption { .. } => {
                CliError::Secrets {
                    message,
                    help: None,
                }
            }
            SecretsError::Io { .. } => CliError::Io { message },
            SecretsError::Yaml { .. } => CliError::input(message),
            SecretsError::Core(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
