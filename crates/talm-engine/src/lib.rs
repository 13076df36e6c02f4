//! talm Engine - Jinja2 templating for Talos machine configuration
//!
//! This crate provides a MiniJinja-based template engine with:
//! - Helm-style filters (toyaml, b64encode, nindent, ...) and network helpers
//! - Node discovery functions backed by an injected [`LookupProvider`]
//! - Cooperative cancellation of long renders
//! - Human-readable error messages with suggestions

pub mod cancel;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;
pub mod lookup;
pub mod suggestions;

pub use cancel::{Cancellation, Cancelled};
pub use discovery::{DISCOVERY_FUNCTIONS, Discovery};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, TemplateError, TemplateErrorKind};
pub use lookup::{LookupError, LookupProvider, ResourceKind, StaticLookup};
pub use suggestions::{AVAILABLE_FILTERS, GENERAL_FUNCTIONS};
