//! Fuzzy matching for template error suggestions
//!
//! Unknown names are compared against what the engine registers using
//! Levenshtein distance (`strsim`).

use crate::discovery::DISCOVERY_FUNCTIONS;

/// Maximum Levenshtein distance to consider for suggestions
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// All registered filters in the engine
pub const AVAILABLE_FILTERS: &[&str] = &[
    // talm filters
    "toyaml",
    "tojson",
    "b64encode",
    "b64decode",
    "quote",
    "squote",
    "nindent",
    "indent",
    "required",
    "empty",
    "haskey",
    "keys",
    "merge",
    "sha256",
    "trimprefix",
    "trimsuffix",
    "semver_match",
    "ip_address",
    "ip_prefix",
    "is_ipv6",
    // Built-in MiniJinja filters
    "default",
    "upper",
    "lower",
    "replace",
    "trim",
    "join",
    "first",
    "last",
    "length",
    "reverse",
    "sort",
    "unique",
    "map",
    "select",
    "reject",
    "selectattr",
    "rejectattr",
    "dictsort",
    "items",
    "int",
    "float",
    "string",
    "list",
    "bool",
    "urlencode",
];

/// General functions registered alongside the discovery functions
pub const GENERAL_FUNCTIONS: &[&str] = &[
    "fail", "dict", "list", "get", "dig", "coalesce", "ternary", "tostring", "toint", "printf",
    // Built-in MiniJinja globals
    "range", "namespace",
];

/// Top-level context variables always available in templates
pub const CONTEXT_VARIABLES: &[&str] = &["machineType", "values", "chart", "capabilities"];

/// A candidate name close to what the template used
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub text: String,
    /// Levenshtein distance (lower = better match)
    pub distance: usize,
    pub category: SuggestionCategory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuggestionCategory {
    Variable,
    Filter,
    Function,
    Property,
}

/// Find closest matches from a list of candidates, best first
pub fn find_closest_matches(
    input: &str,
    candidates: &[&str],
    max_results: usize,
    category: SuggestionCategory,
) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = candidates
        .iter()
        .filter_map(|&candidate| {
            let distance = strsim::levenshtein(input, candidate);
            (distance > 0 && distance <= MAX_SUGGESTION_DISTANCE).then(|| Suggestion {
                text: candidate.to_string(),
                distance,
                category,
            })
        })
        .collect();

    suggestions.sort_by_key(|s| s.distance);
    suggestions.truncate(max_results);
    suggestions
}

fn did_you_mean(matches: &[Suggestion]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let names: Vec<String> = matches.iter().map(|s| format!("`{}`", s.text)).collect();
    Some(format!("Did you mean {}?", names.join(" or ")))
}

/// Suggest corrections for an undefined variable
///
/// Context variables are tried first, then the top-level value keys.
pub fn suggest_undefined_variable(name: &str, value_keys: &[String]) -> Option<String> {
    let root = name.split('.').next().unwrap_or(name);

    if root == "machine_type" || root == "machinetype" {
        return Some("Did you mean `machineType`?".to_string());
    }

    let context = find_closest_matches(root, CONTEXT_VARIABLES, 1, SuggestionCategory::Variable);
    if let Some(hint) = did_you_mean(&context) {
        return Some(hint);
    }

    let candidates: Vec<&str> = value_keys.iter().map(String::as_str).collect();
    let matches = find_closest_matches(root, &candidates, 3, SuggestionCategory::Variable);
    did_you_mean(&matches).map(|hint| format!("{} Values are accessed as `values.<key>`.", hint))
}

/// Suggest corrections for an unknown filter
pub fn suggest_unknown_filter(filter_name: &str) -> Option<String> {
    let matches = find_closest_matches(filter_name, AVAILABLE_FILTERS, 3, SuggestionCategory::Filter);
    Some(did_you_mean(&matches).unwrap_or_else(|| {
        format!(
            "Unknown filter `{}`. Common filters: toyaml, tojson, b64encode, quote, default, nindent",
            filter_name
        )
    }))
}

/// Suggest corrections for an unknown function, discovery functions included
pub fn suggest_unknown_function(func_name: &str) -> Option<String> {
    let candidates: Vec<&str> = GENERAL_FUNCTIONS
        .iter()
        .chain(DISCOVERY_FUNCTIONS)
        .copied()
        .collect();
    let matches = find_closest_matches(func_name, &candidates, 3, SuggestionCategory::Function);
    Some(did_you_mean(&matches).unwrap_or_else(|| {
        format!(
            "Unknown function `{}`. Available functions: {}",
            func_name,
            candidates.join(", ")
        )
    }))
}

/// Hint for iterating over something that is not a sequence
pub fn suggest_iteration_fix(type_name: &str) -> String {
    match type_name {
        "object" | "map" => {
            "Mappings iterate with `| items`: `{% for key, value in obj | items %}`".to_string()
        }
        "null" | "none" => {
            "Value is empty. Guard it with `| default([])` before iterating".to_string()
        }
        other => format!("Value of type `{}` is not iterable", other),
    }
}

/// First name quoted with backticks, single or double quotes in a message
pub fn extract_quoted_name(msg: &str) -> Option<String> {
    ['`', '\'', '"'].iter().find_map(|&quote| {
        let start = msg.find(quote)? + 1;
        let len = msg[start..].find(quote)?;
        Some(msg[start..start + len].to_string())
    })
}
