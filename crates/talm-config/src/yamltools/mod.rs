//! YAML tooling for in-place config updates
//!
//! - [`path`]: structural paths and the scalar/sequence/mapping view
//! - [`diff`]: structural diff producing `$patch: delete` aware patches
//! - [`comments`]: carrying comments over between documents

pub mod comments;
pub mod diff;
pub mod path;

pub use comments::{CommentMap, Comments, apply_comments, copy_comments, merge_comments};
pub use diff::{diff_values, diff_yamls, unified_diff};
pub use path::{Node, Segment, YamlPath, equivalent, parse_first_document};
