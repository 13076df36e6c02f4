//! Structural YAML diff
//!
//! [`diff_yamls`] produces a patch document: applying it on top of the
//! original (with `$patch: delete` support) yields the modified document.
//! [`unified_diff`] renders a line diff for humans.

use serde_yaml::{Mapping, Value};
use similar::{ChangeTag, TextDiff};

use super::path::{Node, equivalent, parse_first_document};
use crate::error::Result;

/// Key marking a patch directive
pub const PATCH_KEY: &str = "$patch";

/// Directive removing the key it is attached to
pub const PATCH_DELETE: &str = "delete";

/// `{ $patch: delete }`
pub fn delete_marker() -> Value {
    let mut marker = Mapping::new();
    marker.insert(Value::from(PATCH_KEY), Value::from(PATCH_DELETE));
    Value::Mapping(marker)
}

/// Whether a value is a `$patch: delete` directive
pub fn is_delete_marker(value: &Value) -> bool {
    value
        .as_mapping()
        .and_then(|map| map.get(PATCH_KEY))
        .and_then(Value::as_str)
        == Some(PATCH_DELETE)
}

/// Changes needed to turn `original` into `modified`, `None` if equivalent
///
/// Mappings are compared key by key regardless of order. Anything else,
/// sequences included, is reported whole when it differs.
pub fn diff_values(original: &Value, modified: &Value) -> Option<Value> {
    if equivalent(original, modified) {
        return None;
    }

    let (Node::Mapping(before), Node::Mapping(after)) = (Node::of(original), Node::of(modified))
    else {
        return Some(modified.clone());
    };

    let mut patch = Mapping::new();
    for (key, new_value) in after {
        match before.get(key) {
            None => {
                patch.insert(key.clone(), new_value.clone());
            }
            Some(old_value) => {
                if let Some(changed) = diff_values(old_value, new_value) {
                    patch.insert(key.clone(), changed);
                }
            }
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), delete_marker());
        }
    }

    Some(Value::Mapping(patch))
}

/// Structural diff of two YAML documents as YAML bytes
///
/// Empty when both documents are value-equivalent.
pub fn diff_yamls(original: &str, modified: &str) -> Result<Vec<u8>> {
    let before = parse_first_document(original)?;
    let after = parse_first_document(modified)?;

    match diff_values(&before, &after) {
        None => Ok(Vec::new()),
        Some(patch) => Ok(serde_yaml::to_string(&patch)?.into_bytes()),
    }
}

/// Line diff in unified style (`-`/`+`/` ` prefixes), empty when identical
pub fn unified_diff(old: &str, new: &str, old_name: &str, new_name: &str) -> String {
    if old == new {
        return String::new();
    }

    let diff = TextDiff::from_lines(old, new);
    let mut output = format!("--- {}\n+++ {}\n", old_name, new_name);
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        output.push_str(&hunk.header().to_string());
        output.push('\n');
        for change in hunk.iter_changes() {
            let prefix = match change.tag() {
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
                ChangeTag::Equal => ' ',
            };
            output.push(prefix);
            output.push_str(change.value().trim_end_matches('\n'));
            output.push('\n');
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_str(a: &str, b: &str) -> String {
        String::from_utf8(diff_yamls(a, b).unwrap()).unwrap()
    }

    #[test]
    fn test_identical_documents_have_empty_diff() {
        let doc = "machine:\n  type: worker\n  certSANs: [a, b]\n";
        assert!(diff_yamls(doc, doc).unwrap().is_empty());
    }

    #[test]
    fn test_key_order_is_ignored() {
        let a = "machine:\n  type: worker\n  token: x\n";
        let b = "machine:\n  token: x\n  type: worker\n";
        assert!(diff_yamls(a, b).unwrap().is_empty());
    }

    #[test]
    fn test_changed_key_only() {
        let a = "machine:\n  type: worker\n  token: x\ncluster:\n  name: demo\n";
        let b = "machine:\n  type: worker\n  token: y\ncluster:\n  name: demo\n";
        assert_eq!(diff_str(a, b), "machine:\n  token: y\n");
    }

    #[test]
    fn test_removed_key_is_deleted() {
        let a = "machine:\n  type: worker\n  install:\n    disk: /dev/sda\n";
        let b = "machine:\n  type: worker\n";
        let patch: Value = serde_yaml::from_slice(&diff_yamls(a, b).unwrap()).unwrap();
        assert!(is_delete_marker(&patch["machine"]["install"]));
        assert!(patch["machine"].get("type").is_none());
    }

    #[test]
    fn test_sequences_reported_whole() {
        let a = "machine:\n  certSANs: [a, b, c]\n";
        let b = "machine:\n  certSANs: [a, x, c]\n";
        assert_eq!(diff_str(a, b), "machine:\n  certSANs:\n  - a\n  - x\n  - c\n");
    }

    #[test]
    fn test_added_key() {
        let a = "machine: {}\n";
        let b = "machine:\n  kubelet:\n    image: k\n";
        assert_eq!(diff_str(a, b), "machine:\n  kubelet:\n    image: k\n");
    }

    #[test]
    fn test_unified_diff() {
        assert!(unified_diff("a\n", "a\n", "old", "new").is_empty());
        let out = unified_diff("a\nb\n", "a\nc\n", "old", "new");
        assert!(out.starts_with("--- old\n+++ new\n"));
        assert!(out.contains("-b\n"));
        assert!(out.contains("+c\n"));
    }
}
