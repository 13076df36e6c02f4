//! Modeline codec
//!
//! Rendered node files start with a single comment line recording what
//! produced them, so they can be re-rendered without any other state:
//!
//! ```text
//! # talm: nodes=["10.0.0.5"], endpoints=["10.0.0.5"], templates=["templates/controlplane.yaml"]
//! # THIS FILE IS AUTOGENERATED. PREFER TEMPLATE EDITS OVER MANUAL ONES.
//! machine:
//!   ...
//! ```
//!
//! Every value is a compact JSON array, so entries containing commas or
//! spaces survive a round trip.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ModelineError;

/// Marker token opening a modeline
pub const MODELINE_MARKER: &str = "# talm:";

/// Warning line written right after the modeline
pub const AUTOGENERATED_WARNING: &str =
    "# THIS FILE IS AUTOGENERATED. PREFER TEMPLATE EDITS OVER MANUAL ONES.";

/// Render provenance embedded in a generated file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modeline {
    pub nodes: Vec<String>,
    pub endpoints: Vec<String>,
    pub templates: Vec<String>,
}

impl Modeline {
    pub fn new(nodes: Vec<String>, endpoints: Vec<String>, templates: Vec<String>) -> Self {
        Self {
            nodes,
            endpoints,
            templates,
        }
    }

    /// Encode as a single comment line (no trailing newline)
    pub fn encode(&self) -> String {
        format!(
            "{} nodes={}, endpoints={}, templates={}",
            MODELINE_MARKER,
            json_array(&self.nodes),
            json_array(&self.endpoints),
            json_array(&self.templates)
        )
    }

    /// Decode the first line of `header`
    ///
    /// Returns `ModelineError::NotFound` when the line does not start with
    /// the marker, `ModelineError::Malformed` when it does but cannot be parsed.
    pub fn decode(header: &str) -> Result<Self, ModelineError> {
        let line = header.lines().next().unwrap_or_default().trim();
        let Some(body) = line.strip_prefix(MODELINE_MARKER) else {
            return Err(ModelineError::NotFound);
        };

        let mut modeline = Modeline::default();
        let mut rest = body.trim_start();

        while !rest.is_empty() {
            let (key, after_key) = rest
                .split_once('=')
                .ok_or_else(|| ModelineError::malformed(format!("expected key=value near '{}'", rest)))?;
            let key = key.trim();

            let mut stream =
                serde_json::Deserializer::from_str(after_key).into_iter::<Vec<String>>();
            let values = match stream.next() {
                Some(Ok(values)) => values,
                Some(Err(e)) => {
                    return Err(ModelineError::malformed(format!(
                        "invalid value for '{}': {}",
                        key, e
                    )));
                }
                None => {
                    return Err(ModelineError::malformed(format!("missing value for '{}'", key)));
                }
            };
            let consumed = stream.byte_offset();

            match key {
                "nodes" => modeline.nodes = values,
                "endpoints" => modeline.endpoints = values,
                "templates" => modeline.templates = values,
                other => tracing::warn!(key = other, "ignoring unknown modeline field"),
            }

            rest = after_key[consumed..].trim_start();
            if rest.is_empty() {
                break;
            }
            rest = rest
                .strip_prefix(',')
                .ok_or_else(|| {
                    ModelineError::malformed(format!("expected ',' after '{}' field", key))
                })?
                .trim_start();
        }

        Ok(modeline)
    }

    /// Prepend this modeline and the autogenerated warning to a rendered document
    pub fn wrap(&self, document: &str) -> String {
        let mut out = String::with_capacity(document.len() + 256);
        out.push_str(&self.encode());
        out.push('\n');
        out.push_str(AUTOGENERATED_WARNING);
        out.push('\n');
        out.push_str(document.trim_start_matches('\n'));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Modeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Split a generated file into its modeline (if any) and the document body
///
/// The autogenerated warning line is dropped along with the modeline.
pub fn split_header(content: &str) -> (Result<Modeline, ModelineError>, &str) {
    let modeline = Modeline::decode(content);
    if matches!(modeline, Err(ModelineError::NotFound)) {
        return (modeline, content);
    }

    let mut body = skip_line(content);
    if body.trim_start().starts_with(AUTOGENERATED_WARNING) {
        body = skip_line(body.trim_start());
    }
    (modeline, body)
}

fn skip_line(content: &str) -> &str {
    match content.find('\n') {
        Some(idx) => &content[idx + 1..],
        None => "",
    }
}

fn json_array(values: &[String]) -> String {
    // Serializing a slice of strings cannot fail
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}
