//! Splitting patch streams into machine config patches and extra documents
//!
//! A patch file may hold several YAML documents. Documents whose top-level
//! mapping has a `machine` or `cluster` section are config patches; every
//! other mapping (`UserVolumeConfig`, `NetworkDefaultActionConfig`, ...) is
//! an extra document passed through untouched. Order is preserved within
//! and across inputs.

use serde_yaml::Value;
use std::path::Path;

use crate::error::{ConfigError, Result};

/// Top-level sections that make a document a machine config patch
pub const CONFIG_SECTIONS: [&str; 2] = ["machine", "cluster"];

/// One machine config patch document
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigPatch {
    /// Where the patch came from (file path or `input N`)
    pub source: String,
    /// Document text as written
    pub raw: String,
    pub tree: Value,
}

impl ConfigPatch {
    /// Parse a single patch document, rejecting anything that is not a config patch
    pub fn parse(source: impl Into<String>, text: &str) -> Result<Self> {
        let source = source.into();
        let raw = text.replace("\r\n", "\n");
        let tree: Value = serde_yaml::from_str(&raw).map_err(|e| ConfigError::InvalidPatch {
            source_name: source.clone(),
            message: e.to_string(),
        })?;

        if !is_config_patch(&tree) {
            return Err(ConfigError::InvalidPatch {
                source_name: source,
                message: "expected a mapping with a machine or cluster section".to_string(),
            });
        }

        Ok(Self { source, raw, tree })
    }
}

/// A non-machine-config document, tagged by `kind` and `apiVersion`
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraDocument {
    /// Empty when the document has no `kind`
    pub kind: String,
    pub api_version: String,
    pub raw: String,
    pub tree: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub patches: Vec<ConfigPatch>,
    pub extras: Vec<ExtraDocument>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.extras.is_empty()
    }

    fn add(&mut self, source: &str, raw: String) {
        let tree: Value = match serde_yaml::from_str(&raw) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(source, error = %e, "skipping unparseable document");
                return;
            }
        };

        let Some(map) = tree.as_mapping() else {
            if !tree.is_null() {
                tracing::warn!(source, "skipping document that is not a mapping");
            }
            return;
        };
        if map.is_empty() {
            tracing::warn!(source, "skipping empty document");
            return;
        }

        if is_config_patch(&tree) {
            self.patches.push(ConfigPatch {
                source: source.to_string(),
                raw,
                tree,
            });
        } else {
            let field = |name: &str| {
                map.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let kind = field("kind");
            let api_version = field("apiVersion");
            tracing::debug!(source, kind = %kind, "found extra document");
            self.extras.push(ExtraDocument {
                kind,
                api_version,
                raw,
                tree,
            });
        }
    }
}

/// Whether a parsed document has a `machine` or `cluster` section
pub fn is_config_patch(tree: &Value) -> bool {
    tree.as_mapping()
        .is_some_and(|map| CONFIG_SECTIONS.iter().any(|key| map.contains_key(*key)))
}

/// Split a YAML stream on `---` lines, after normalizing line endings
pub fn split_documents(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in normalized.lines() {
        let separator = line.trim_end();
        if separator == "---" || separator.starts_with("--- ") {
            documents.push(std::mem::take(&mut current));
            if let Some(rest) = separator.strip_prefix("--- ") {
                current.push_str(rest.trim_start());
                current.push('\n');
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|doc| !doc.trim().is_empty())
        .collect()
}

/// Classify in-memory patch texts
///
/// Malformed, non-mapping or empty sub-documents are skipped with a warning.
pub fn classify<S: AsRef<str>>(inputs: &[S]) -> Classification {
    let mut classification = Classification::default();
    for (index, input) in inputs.iter().enumerate() {
        let source = format!("input {}", index + 1);
        for document in split_documents(input.as_ref()) {
            classification.add(&source, document);
        }
    }
    classification
}

/// Classify patch files, in the order given
pub fn classify_files<P: AsRef<Path>>(paths: &[P]) -> Result<Classification> {
    let mut classification = Classification::default();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Classification {
            path: path.to_path_buf(),
            source,
        })?;

        let source = path.display().to_string();
        for document in split_documents(&text) {
            classification.add(&source, document);
        }
    }
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_patch_and_extra_document() {
        let input = "machine:\n  type: worker\n---\napiVersion: v1alpha1\nkind: UserVolumeConfig\nname: databig";
        let result = classify(&[input]);

        assert_eq!(result.patches.len(), 1);
        assert_eq!(result.patches[0].tree["machine"]["type"], "worker");
        assert_eq!(result.extras.len(), 1);
        assert_eq!(result.extras[0].kind, "UserVolumeConfig");
        assert_eq!(result.extras[0].api_version, "v1alpha1");
        assert!(result.extras[0].raw.contains("name: databig"));
    }

    #[test]
    fn test_machine_and_cluster_is_one_patch() {
        let result = classify(&["machine:\n  type: controlplane\ncluster:\n  name: x"]);
        assert_eq!(result.patches.len(), 1);
        assert!(result.extras.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(classify(&[""]).is_empty());
        assert!(classify::<&str>(&[]).is_empty());
        assert!(classify(&["---\n---\n"]).is_empty());
    }

    #[test]
    fn test_crlf_input() {
        let input = "machine:\r\n  type: worker\r\n---\r\nkind: HostnameConfig\r\nhostname: n1\r\n";
        let result = classify(&[input]);
        assert_eq!(result.patches.len(), 1);
        assert_eq!(result.extras[0].kind, "HostnameConfig");
        assert!(!result.extras[0].raw.contains('\r'));
    }

    #[test]
    fn test_bad_documents_are_skipped() {
        let input = "machine: [unclosed\n---\n- just\n- a list\n---\nplain scalar\n---\ncluster:\n  clusterName: demo\n";
        let result = classify(&[input]);
        assert_eq!(result.patches.len(), 1);
        assert_eq!(result.patches[0].tree["cluster"]["clusterName"], "demo");
        assert!(result.extras.is_empty());
    }

    #[test]
    fn test_empty_mapping_is_skipped() {
        let result = classify(&["{}\n---\nkind: A\n---\n{ }\n"]);
        assert!(result.patches.is_empty());
        assert_eq!(result.extras.len(), 1);
        assert_eq!(result.extras[0].kind, "A");
    }

    #[test]
    fn test_extra_without_kind() {
        let result = classify(&["name: anonymous\n"]);
        assert_eq!(result.extras.len(), 1);
        assert_eq!(result.extras[0].kind, "");
        assert_eq!(result.extras[0].api_version, "");
    }

    #[test]
    fn test_order_across_inputs() {
        let result = classify(&[
            "kind: A\n---\nmachine:\n  token: one\n",
            "machine:\n  token: two\n---\nkind: B\n",
        ]);
        let tokens: Vec<_> = result
            .patches
            .iter()
            .map(|p| p.tree["machine"]["token"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tokens, vec!["one", "two"]);
        let kinds: Vec<_> = result.extras.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["A", "B"]);
        assert_eq!(result.patches[1].source, "input 2");
    }

    #[test]
    fn test_classify_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "machine:\n  type: worker\n").unwrap();

        let result = classify_files(&[file.path()]).unwrap();
        assert_eq!(result.patches.len(), 1);
        assert_eq!(result.patches[0].source, file.path().display().to_string());

        let missing = classify_files(&["/nonexistent/patch.yaml"]);
        assert!(matches!(missing, Err(ConfigError::Classification { .. })));
    }

    #[test]
    fn test_config_patch_parse() {
        assert!(ConfigPatch::parse("p", "machine:\n  type: worker\n").is_ok());
        assert!(matches!(
            ConfigPatch::parse("p", "kind: UserVolumeConfig\n"),
            Err(ConfigError::InvalidPatch { .. })
        ));
        assert!(ConfigPatch::parse("p", "machine: [").is_err());
    }
}
