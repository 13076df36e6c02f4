//! talm Config - Machine configuration assembly
//!
//! - [`classify`]: split patch streams into config patches and extra documents
//! - [`assemble`]: merge the rendered base, patches and secrets bundle
//! - [`yamltools`]: structural diff and comment-preserving merge

pub mod assemble;
pub mod classify;
pub mod error;
pub mod yamltools;

pub use assemble::{
    AssembleOptions, DEFAULT_KUBERNETES_VERSION, DEFAULT_TALOS_VERSION, MachineConfiguration,
    apply_patch, assemble,
};
pub use classify::{
    Classification, ConfigPatch, ExtraDocument, classify, classify_files, split_documents,
};
pub use error::{ConfigError, Result};
