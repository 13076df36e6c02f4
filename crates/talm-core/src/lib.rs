//! talm Core - Core types for rendering Talos machine configuration
//!
//! This crate provides the foundational types used throughout talm:
//! - `LoadedChart`: The project definition (Chart.yaml, values, templates)
//! - `Values`: Configuration values with deep merge support
//! - `TemplateContext`: Template rendering context
//! - `Modeline`: Render provenance embedded in generated files
//! - `SecretsBundle`: Cluster PKI and tokens

pub mod bundle;
pub mod chart;
pub mod context;
pub mod error;
pub mod fsutil;
pub mod machine;
pub mod modeline;
pub mod values;

pub use bundle::{
    BundleGenerator, CaKind, CertificateAndKey, FileBundleProvider, SecretsBundle,
    SecretsBundleProvider,
};
pub use chart::{ChartMetadata, LoadedChart, TemplateOptions};
pub use context::{Capabilities, ChartInfo, TemplateContext};
pub use error::{CoreError, ModelineError};
pub use machine::{MachineRole, VersionContract};
pub use modeline::{Modeline, AUTOGENERATED_WARNING, MODELINE_MARKER};
pub use values::{Values, parse_set_values};
