//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

use crate::cancel::Cancelled;
use crate::lookup::LookupError;
use crate::suggestions::{
    extract_quoted_name, find_closest_matches, suggest_iteration_fix, suggest_undefined_variable,
    suggest_unknown_filter, suggest_unknown_function, SuggestionCategory, AVAILABLE_FILTERS,
};

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error")]
    Template(#[from] TemplateError),

    #[error("Template '{name}' not found in chart")]
    TemplateNotFound { name: String },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Core(#[from] talm_core::CoreError),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Convert a render failure, surfacing lookup failures and cancellation as such
    ///
    /// Discovery functions attach the original [`LookupError`] or
    /// [`Cancelled`] as the MiniJinja error source.
    pub fn from_render(
        err: minijinja::Error,
        template_name: &str,
        template_source: &str,
        values: Option<&serde_json::Value>,
    ) -> Self {
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            if let Some(cancelled) = cause.downcast_ref::<Cancelled>() {
                return Self::Cancelled(*cancelled);
            }
            if let Some(lookup) = cause.downcast_ref::<LookupError>() {
                return Self::Lookup(lookup.clone());
            }
            source = cause.source();
        }
        Self::Template(TemplateError::from_minijinja_enhanced(
            err,
            template_name,
            template_source,
            values,
        ))
    }

    /// Whether the render was stopped by the caller rather than failing
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl TemplateErrorKind {
    /// Short code used in diagnostics
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::UndefinedVariable => "undefined_variable",
            Self::UnknownFilter => "unknown_filter",
            Self::UnknownFunction => "unknown_function",
            Self::SyntaxError => "syntax",
            Self::TypeError => "type",
            Self::InvalidOperation => "invalid_operation",
            Self::Other => "render",
        }
    }
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(talm::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,

    /// Line of the template the error was reported on
    pub line: Option<usize>,
}

impl TemplateError {
    /// Create a new template error from a MiniJinja error
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        Self::from_minijinja_enhanced(err, template_name, template_source, None)
    }

    /// Same as [`from_minijinja`](Self::from_minijinja), using `values` to
    /// suggest keys when a `values.*` path is undefined
    pub fn from_minijinja_enhanced(
        err: minijinja::Error,
        template_name: &str,
        template_source: &str,
        values: Option<&serde_json::Value>,
    ) -> Self {
        let kind = categorize(&err);
        let detailed = format!("{:#}", err);
        let expression = highlighted_expression(&detailed);
        let message = describe(&err, kind, expression.as_ref());
        let line = err.line();

        Self {
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span: line.and_then(|line| line_span(template_source, line)),
            suggestion: suggest(&err, kind, expression.as_ref(), values),
            line,
        }
    }

    /// Create a simple error without source mapping
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::Other,
            src: NamedSource::new("<unknown>", String::new()),
            span: None,
            suggestion: None,
            line: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

fn categorize(err: &minijinja::Error) -> TemplateErrorKind {
    use minijinja::ErrorKind;

    match err.kind() {
        ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        ErrorKind::NonPrimitive | ErrorKind::NonKey => TemplateErrorKind::TypeError,
        ErrorKind::InvalidOperation => {
            let msg = err.to_string().to_lowercase();
            if msg.contains("not iterable") || msg.contains("not callable") {
                TemplateErrorKind::TypeError
            } else {
                TemplateErrorKind::InvalidOperation
            }
        }
        _ => TemplateErrorKind::Other,
    }
}

/// The `{{ ... }}` expression on the line MiniJinja marks with `>`
///
/// MiniJinja's alternate display looks like:
///
/// ```text
///    8 >   hostname: {{ value.hostname | quote }}
///      i              ^^^^^^^^^^^^^^^ undefined value
/// ```
struct Highlight {
    expression: String,
    filter: Option<String>,
}

fn highlighted_expression(display: &str) -> Option<Highlight> {
    let line = display.lines().find(|line| {
        line.trim_start()
            .split_once(" > ")
            .is_some_and(|(n, _)| n.trim().parse::<usize>().is_ok())
    })?;

    let start = line.find("{{")?;
    let end = line[start..].find("}}")? + start;
    let inner = line[start + 2..end].trim();

    let mut parts = inner.split('|');
    let expression = parts.next().unwrap_or_default().trim().to_string();
    let filter = parts
        .next_back()
        .and_then(|f| f.split(|c: char| c.is_whitespace() || c == '(').find(|s| !s.is_empty()))
        .map(str::to_string);

    Some(Highlight { expression, filter })
}

fn describe(err: &minijinja::Error, kind: TemplateErrorKind, highlight: Option<&Highlight>) -> String {
    let msg = err.detail().unwrap_or_default();
    let msg = if msg.is_empty() { err.to_string() } else { msg.to_string() };

    match (kind, highlight) {
        (TemplateErrorKind::UndefinedVariable, Some(h)) if !h.expression.is_empty() => {
            format!("undefined variable `{}`", h.expression)
        }
        (TemplateErrorKind::UnknownFilter, Some(Highlight { filter: Some(f), .. })) => {
            format!("unknown filter `{}`", f)
        }
        _ => msg
            .replace("invalid operation: ", "")
            .replace("syntax error: ", "")
            .replace("undefined value", "undefined variable"),
    }
}

/// Span covering the whole of line `line_num` (1-based)
fn line_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (idx, line) in source.split('\n').enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.trim_end_matches('\r').len()));
        }
        offset += line.len() + 1;
    }
    None
}

fn suggest(
    err: &minijinja::Error,
    kind: TemplateErrorKind,
    highlight: Option<&Highlight>,
    values: Option<&serde_json::Value>,
) -> Option<String> {
    let msg = err.to_string();

    match kind {
        TemplateErrorKind::UndefinedVariable => {
            let name = highlight
                .map(|h| h.expression.clone())
                .filter(|e| !e.is_empty())
                .or_else(|| extract_quoted_name(&msg))?;
            suggest_for_path(&name, values)
        }
        TemplateErrorKind::UnknownFilter => {
            match highlight.and_then(|h| h.filter.clone()).or_else(|| extract_quoted_name(&msg)) {
                Some(filter) => suggest_unknown_filter(&filter),
                None => Some(format!("Available filters: {}", AVAILABLE_FILTERS.join(", "))),
            }
        }
        TemplateErrorKind::UnknownFunction => {
            let name = extract_quoted_name(&msg)
                .or_else(|| err.detail().and_then(|d| d.split_whitespace().next()).map(str::to_string))
                .or_else(|| highlight.map(|h| h.expression.clone()))?;
            let name = name.split('(').next().unwrap_or_default().trim();
            suggest_unknown_function(name)
        }
        TemplateErrorKind::SyntaxError => Some(
            "Check bracket matching: `{{ }}` for expressions, `{% %}` for statements, `{# #}` for comments"
                .to_string(),
        ),
        TemplateErrorKind::TypeError if msg.contains("not iterable") => {
            Some(suggest_iteration_fix("object"))
        }
        _ => None,
    }
}

/// Suggestion for an undefined expression, walking `values.*` paths
fn suggest_for_path(name: &str, values: Option<&serde_json::Value>) -> Option<String> {
    if name == "value" || name.starts_with("value.") {
        return Some(format!(
            "Did you mean `{}`? Values are accessed through `values`.",
            name.replacen("value", "values", 1)
        ));
    }

    if let (Some(path), Some(values)) = (name.strip_prefix("values."), values) {
        let mut current = values;
        let mut walked = vec!["values"];
        for part in path.split('.') {
            match current.get(part) {
                Some(next) => {
                    current = next;
                    walked.push(part);
                }
                None => {
                    let available: Vec<&str> = current
                        .as_object()
                        .map(|obj| obj.keys().map(String::as_str).collect())
                        .unwrap_or_default();
                    if available.is_empty() {
                        break;
                    }
                    let parent = walked.join(".");
                    let matches =
                        find_closest_matches(part, &available, 3, SuggestionCategory::Property);
                    return Some(match matches.first() {
                        Some(best) => format!(
                            "Did you mean `{}.{}`? Available keys: {}",
                            parent,
                            best.text,
                            available.join(", ")
                        ),
                        None => format!(
                            "Key `{}` not found in `{}`. Available keys: {}",
                            part,
                            parent,
                            available.join(", ")
                        ),
                    });
                }
            }
        }
    }

    let top_level = values
        .and_then(|v| v.as_object())
        .map(|obj| obj.keys().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    suggest_undefined_variable(name, &top_level).or_else(|| {
        Some(format!(
            "`{}` is not defined. Check spelling or use `| default(...)`.",
            name
        ))
    })
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_error_simple() {
        let error = TemplateError::simple("test message").with_suggestion("try this");
        assert_eq!(error.message, "test message");
        assert_eq!(error.kind(), TemplateErrorKind::Other);
        assert_eq!(error.suggestion.as_deref(), Some("try this"));
    }

    #[test]
    fn test_kind_to_code_string() {
        assert_eq!(
            TemplateErrorKind::UndefinedVariable.to_code_string(),
            "undefined_variable"
        );
        assert_eq!(TemplateErrorKind::SyntaxError.to_code_string(), "syntax");
    }

    #[test]
    fn test_highlighted_expression() {
        let display = "\n   8 >   hostname: {{ value.hostname | quote }}\n     i              ^^^^^ undefined value\n";
        let h = highlighted_expression(display).unwrap();
        assert_eq!(h.expression, "value.hostname");
        assert_eq!(h.filter.as_deref(), Some("quote"));

        let display = "   3 >   disk: {{ values.disk | toyml(2) }}\n";
        let h = highlighted_expression(display).unwrap();
        assert_eq!(h.filter.as_deref(), Some("toyml"));
    }

    #[test]
    fn test_line_span() {
        let source = "a: 1\nbb: 2\nccc: 3";
        let span = line_span(source, 2).unwrap();
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 5);
        assert!(line_span(source, 9).is_none());
    }

    #[test]
    fn test_suggest_for_values_path() {
        let values = json!({"cluster": {"endpoint": "https://10.0.0.1:6443"}});
        let hint = suggest_for_path("values.cluster.endpont", Some(&values)).unwrap();
        assert!(hint.contains("values.cluster.endpoint"));

        let hint = suggest_for_path("value.cluster", None).unwrap();
        assert!(hint.contains("values.cluster"));
    }

    #[test]
    fn test_from_render_plain_template_error() {
        let err = minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, "boom");
        let engine_err = EngineError::from_render(err, "t.yaml", "x", None);
        assert!(matches!(engine_err, EngineError::Template(_)));
    }

    #[test]
    fn test_from_render_surfaces_cancellation() {
        let err = minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, "stop")
            .with_source(Cancelled::DeadlineExceeded);
        let engine_err = EngineError::from_render(err, "t.yaml", "x", None);
        assert!(engine_err.is_cancelled());
    }
}
