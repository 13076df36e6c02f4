//! Comment carry-over between YAML documents
//!
//! YAML parsers drop comments, so this module works on text. A line scanner
//! tracks the structural path of every node line in block-style YAML; the
//! comments found around those lines are collected into a [`CommentMap`]
//! and can then be re-attached to the same paths in another document.
//!
//! Head comments (comment lines directly above a node) attach to the
//! outermost node starting on the line, line comments to the innermost one:
//!
//! ```yaml
//! # head of machine.certSANs[0]
//! - name: eth0 # line comment of machine.certSANs[0].name
//! ```

use std::collections::BTreeMap;

use talm_core::modeline::split_header;

use super::path::YamlPath;

/// Comments attached to one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comments {
    /// Comment lines above the node, without indentation
    pub head: Vec<String>,
    /// Trailing comment on the node's line, starting at `#`
    pub line: Option<String>,
}

/// Structural path -> comments, scoped to one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentMap {
    entries: BTreeMap<YamlPath, Comments>,
    foot: Vec<String>,
}

impl CommentMap {
    pub fn get(&self, path: &YamlPath) -> Option<&Comments> {
        self.entries.get(path)
    }

    /// Comment lines after the last node
    pub fn foot(&self) -> &[String] {
        &self.foot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.foot.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &YamlPath> {
        self.entries.keys()
    }

    fn head(&self, path: &YamlPath) -> &[String] {
        self.entries.get(path).map(|c| c.head.as_slice()).unwrap_or_default()
    }
}

/// Collect every comment of a document, keyed by structural path
pub fn copy_comments(source: &str) -> CommentMap {
    let mut map = CommentMap::default();
    let mut pending: Vec<String> = Vec::new();

    for (_, line) in scan(source) {
        match line {
            Line::Comment(text) => pending.push(text),
            Line::Node {
                outer,
                inner,
                comment,
                ..
            } => {
                if !pending.is_empty() {
                    map.entries
                        .entry(outer)
                        .or_default()
                        .head
                        .append(&mut pending);
                }
                if let Some(comment) = comment {
                    map.entries.entry(inner).or_default().line = Some(comment);
                }
            }
            Line::Other => {}
        }
    }

    map.foot = pending;
    map
}

/// Re-attach comments to the matching paths of `destination`
///
/// Paths that no longer exist are dropped. Comments the destination
/// already carries at a path are kept and not duplicated.
pub fn apply_comments(destination: &str, comments: &CommentMap) -> String {
    let existing = copy_comments(destination);
    let mut out: Vec<String> = Vec::new();

    for (raw, line) in scan(destination) {
        let Line::Node {
            outer,
            inner,
            indent,
            comment,
        } = line
        else {
            out.push(raw.to_string());
            continue;
        };

        if let Some(source) = comments.get(&outer) {
            let present = existing.head(&outer);
            let pad = " ".repeat(indent);
            out.extend(
                source
                    .head
                    .iter()
                    .filter(|head| !present.contains(head))
                    .map(|head| format!("{}{}", pad, head)),
            );
        }

        let carried = comments.get(&inner).and_then(|c| c.line.as_deref());
        match (comment, carried) {
            (None, Some(carried)) => out.push(format!("{} {}", raw.trim_end(), carried)),
            _ => out.push(raw.to_string()),
        }
    }

    out.extend(
        comments
            .foot
            .iter()
            .filter(|foot| !existing.foot.contains(foot))
            .cloned(),
    );

    let mut merged = out.join("\n");
    if destination.ends_with('\n') && !merged.is_empty() {
        merged.push('\n');
    }
    merged
}

/// Carry comments from a previously generated file onto its re-rendered version
///
/// The modeline header of `old` is ignored; the header of `new` (if any) is
/// kept on top of the merged document.
pub fn merge_comments(old: &str, new: &str) -> String {
    let (_, old_body) = split_header(old);
    let comments = copy_comments(old_body);

    match split_header(new) {
        (Ok(modeline), new_body) => modeline.wrap(&apply_comments(new_body, &comments)),
        (Err(_), _) => apply_comments(new, &comments),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Node {
        outer: YamlPath,
        inner: YamlPath,
        indent: usize,
        comment: Option<String>,
    },
    Comment(String),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Mapping,
    Sequence,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    indent: usize,
    path: YamlPath,
    last: Option<YamlPath>,
    next_index: usize,
}

/// A scalar whose content continues on the following lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenScalar {
    /// `|` or `>` scalar of a node at this column
    Block(usize),
    /// Plain scalar of a node at this column
    Plain(usize),
    Double,
    Single,
}

#[derive(Debug, Default)]
struct Scanner {
    frames: Vec<Frame>,
    open: Option<OpenScalar>,
    started: bool,
    finished: bool,
}

fn scan(text: &str) -> Vec<(&str, Line)> {
    let mut scanner = Scanner::default();
    text.lines()
        .map(|raw| (raw, scanner.line(raw.trim_end_matches('\r'))))
        .collect()
}

impl Scanner {
    fn line(&mut self, raw: &str) -> Line {
        if self.finished {
            return Line::Other;
        }

        let content = raw.trim_start_matches(' ');
        let indent = raw.len() - content.len();

        match self.open {
            Some(OpenScalar::Block(column)) => {
                if content.trim().is_empty() || indent > column {
                    return Line::Other;
                }
                self.open = None;
            }
            Some(OpenScalar::Plain(column)) => {
                let blank = content.trim().is_empty();
                if blank || (indent > column && !content.starts_with('#')) {
                    return Line::Other;
                }
                self.open = None;
            }
            Some(OpenScalar::Double) => {
                if unescaped_double_quote(content).is_some() {
                    self.open = None;
                }
                return Line::Other;
            }
            Some(OpenScalar::Single) => {
                if unpaired_single_quote(content).is_some() {
                    self.open = None;
                }
                return Line::Other;
            }
            None => {}
        }

        let content = content.trim_end();
        if content.is_empty() {
            return Line::Other;
        }
        if content.starts_with('#') {
            return Line::Comment(content.to_string());
        }
        if content == "---" || content.starts_with("--- ") || content == "..." {
            if self.started {
                self.finished = true;
            }
            return Line::Other;
        }

        let (value, comment) = split_comment(content);
        match self.node(indent, value) {
            Some((outer, inner)) => {
                self.started = true;
                Line::Node {
                    outer,
                    inner,
                    indent,
                    comment: comment.map(str::to_string),
                }
            }
            None => Line::Other,
        }
    }

    /// Paths of the outermost and innermost nodes starting on a line
    fn node(&mut self, indent: usize, content: &str) -> Option<(YamlPath, YamlPath)> {
        let mut column = indent;
        let mut rest = content;
        let mut outer: Option<YamlPath> = None;
        let mut inner: Option<YamlPath> = None;
        let mut value_at: Option<(usize, &str)> = None;

        loop {
            if let Some(after) = dash_item(rest) {
                let path = self.enter_item(column);
                outer.get_or_insert_with(|| path.clone());
                inner = Some(path);

                let value = after.trim_start();
                if value.is_empty() {
                    break;
                }
                value_at = Some((column, value));
                if is_block_indicator(value) {
                    break;
                }
                column += rest.len() - value.len();
                rest = value;
                continue;
            }

            if let Some((key, value)) = split_key(rest) {
                let path = self.enter_key(column, key);
                outer.get_or_insert_with(|| path.clone());
                inner = Some(path);
                value_at = Some((column, value));
            }
            break;
        }

        if let Some((column, value)) = value_at {
            self.open = open_scalar(column, value);
        }
        Some((outer?, inner?))
    }

    fn pop_deeper(&mut self, column: usize) {
        while self.frames.last().is_some_and(|f| f.indent > column) {
            self.frames.pop();
        }
    }

    fn container(&self) -> YamlPath {
        self.frames
            .last()
            .and_then(|f| f.last.clone())
            .unwrap_or_default()
    }

    fn enter_item(&mut self, column: usize) -> YamlPath {
        self.pop_deeper(column);

        let reuse = self
            .frames
            .last()
            .is_some_and(|f| f.indent == column && f.kind == FrameKind::Sequence);
        if !reuse {
            // `key:` followed by `- item` at the same indentation
            let path = self.container();
            self.frames.push(Frame {
                kind: FrameKind::Sequence,
                indent: column,
                path,
                last: None,
                next_index: 0,
            });
        }

        match self.frames.last_mut() {
            Some(frame) => {
                let path = frame.path.index(frame.next_index);
                frame.next_index += 1;
                frame.last = Some(path.clone());
                path
            }
            None => YamlPath::root(),
        }
    }

    fn enter_key(&mut self, column: usize, key: String) -> YamlPath {
        self.pop_deeper(column);
        if self
            .frames
            .last()
            .is_some_and(|f| f.indent == column && f.kind == FrameKind::Sequence)
        {
            self.frames.pop();
        }

        let reuse = self
            .frames
            .last()
            .is_some_and(|f| f.indent == column && f.kind == FrameKind::Mapping);
        if !reuse {
            let path = self.container();
            self.frames.push(Frame {
                kind: FrameKind::Mapping,
                indent: column,
                path,
                last: None,
                next_index: 0,
            });
        }

        match self.frames.last_mut() {
            Some(frame) => {
                let path = frame.path.key(key);
                frame.last = Some(path.clone());
                path
            }
            None => YamlPath::root(),
        }
    }
}

fn dash_item(content: &str) -> Option<&str> {
    if content == "-" {
        return Some("");
    }
    content.strip_prefix("- ")
}

/// Scalar left open at the end of a node's line, if any
fn open_scalar(column: usize, value: &str) -> Option<OpenScalar> {
    let value = skip_properties(value);
    if is_block_indicator(value) {
        return Some(OpenScalar::Block(column));
    }
    match value.chars().next()? {
        '"' => closing_double_quote(value)
            .is_none()
            .then_some(OpenScalar::Double),
        '\'' => closing_single_quote(value)
            .is_none()
            .then_some(OpenScalar::Single),
        '[' | '{' | '*' => None,
        _ => Some(OpenScalar::Plain(column)),
    }
}

/// Strip leading anchors and tags (`&name`, `!!str`)
fn skip_properties(mut value: &str) -> &str {
    while value.starts_with('&') || value.starts_with('!') {
        value = value.find(' ').map_or("", |i| value[i..].trim_start());
    }
    value
}

fn is_block_indicator(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some('|' | '>'))
        && chars.all(|c| c.is_ascii_digit() || c == '+' || c == '-')
}

/// Split `key: value` into the unquoted key and the trimmed value
fn split_key(content: &str) -> Option<(String, &str)> {
    let (key, after) = match content.chars().next()? {
        '"' => {
            let end = closing_double_quote(content)?;
            (
                content[1..end].replace("\\\"", "\"").replace("\\\\", "\\"),
                &content[end + 1..],
            )
        }
        '\'' => {
            let end = closing_single_quote(content)?;
            (content[1..end].replace("''", "'"), &content[end + 1..])
        }
        '[' | '{' | '|' | '>' | '&' | '*' | '!' | '%' | '@' | '`' => return None,
        _ => {
            let end = content
                .find(": ")
                .or_else(|| content.strip_suffix(':').map(str::len))?;
            (content[..end].trim_end().to_string(), &content[end..])
        }
    };

    let value = after.trim_start().strip_prefix(':')?;
    if !value.is_empty() && !value.starts_with(' ') {
        return None;
    }
    Some((key, value.trim()))
}

fn closing_double_quote(content: &str) -> Option<usize> {
    unescaped_double_quote(&content[1..]).map(|i| i + 1)
}

fn closing_single_quote(content: &str) -> Option<usize> {
    unpaired_single_quote(&content[1..]).map(|i| i + 1)
}

fn unescaped_double_quote(content: &str) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn unpaired_single_quote(content: &str) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Split a line into its value part and a trailing `#` comment
///
/// A `#` only starts a comment outside quotes and after whitespace.
fn split_comment(content: &str) -> (&str, Option<&str>) {
    let mut chars = content.char_indices().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut boundary = true;

    while let Some((i, c)) = chars.next() {
        match c {
            '\'' if in_single => {
                if chars.peek().is_some_and(|&(_, next)| next == '\'') {
                    chars.next();
                } else {
                    in_single = false;
                }
            }
            '"' if in_double => in_double = false,
            '\\' if in_double => {
                chars.next();
            }
            '\'' if !in_double && boundary => in_single = true,
            '"' if !in_single && boundary => in_double = true,
            '#' if !in_single && !in_double && boundary && i > 0 => {
                return (content[..i].trim_end(), Some(&content[i..]));
            }
            _ => {}
        }
        boundary = c.is_whitespace() || matches!(c, ':' | '-' | '[' | '{' | ',');
    }
    (content, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use talm_core::Modeline;

    const COMMENTED: &str = "\
# node settings
machine:
  type: controlplane # role
  # SANs for the API
  certSANs:
  - 10.0.0.1
  # floating address
  - 10.0.0.10
  network:
    interfaces:
      - interface: eth0 # uplink
        # static addressing
        addresses:
          - 10.0.0.5/24
cluster:
  clusterName: demo
# end of file
";

    #[test]
    fn test_copy_comments_paths() {
        let map = copy_comments(COMMENTED);
        let root = YamlPath::root();

        let machine = map.get(&root.key("machine")).unwrap();
        assert_eq!(machine.head, vec!["# node settings"]);

        let role = map.get(&root.key("machine").key("type")).unwrap();
        assert_eq!(role.line.as_deref(), Some("# role"));

        let sans = root.key("machine").key("certSANs");
        assert_eq!(map.get(&sans).unwrap().head, vec!["# SANs for the API"]);
        assert_eq!(
            map.get(&sans.index(1)).unwrap().head,
            vec!["# floating address"]
        );

        let iface = root.key("machine").key("network").key("interfaces").index(0);
        assert_eq!(
            map.get(&iface.key("interface")).unwrap().line.as_deref(),
            Some("# uplink")
        );
        assert_eq!(
            map.get(&iface.key("addresses")).unwrap().head,
            vec!["# static addressing"]
        );
        assert_eq!(map.foot(), ["# end of file"]);
    }

    #[test]
    fn test_apply_comments_to_reformatted_document() {
        let rendered = "\
machine:
  certSANs:
    - 10.0.0.1
    - 10.0.0.10
  type: controlplane
  network:
    interfaces:
      - interface: eth0
        addresses:
          - 10.0.0.5/24
cluster:
  clusterName: demo
";
        let merged = apply_comments(rendered, &copy_comments(COMMENTED));
        let expected = "\
# node settings
machine:
  # SANs for the API
  certSANs:
    - 10.0.0.1
    # floating address
    - 10.0.0.10
  type: controlplane # role
  network:
    interfaces:
      - interface: eth0 # uplink
        # static addressing
        addresses:
          - 10.0.0.5/24
cluster:
  clusterName: demo
# end of file
";
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_absent_paths_are_dropped() {
        let old = "machine:\n  # gone\n  install:\n    disk: /dev/sda\n  type: worker\n";
        let new = "machine:\n  type: worker\n";
        assert_eq!(apply_comments(new, &copy_comments(old)), new);
    }

    #[test]
    fn test_existing_comments_not_duplicated() {
        let old = "# keep\nmachine:\n  type: worker # role\n";
        let new = "# keep\nmachine:\n  type: worker # fresh\n";
        assert_eq!(apply_comments(new, &copy_comments(old)), new);
    }

    #[test]
    fn test_block_scalars_are_opaque() {
        let doc = "\
machine:
  files:
    - content: |
        # not a comment
        key: value
      path: /etc/motd
";
        let map = copy_comments(doc);
        assert!(map.is_empty());

        let commented = doc.replace("path: /etc/motd", "path: /etc/motd # motd");
        let map = copy_comments(&commented);
        let path = YamlPath::root()
            .key("machine")
            .key("files")
            .index(0)
            .key("path");
        assert_eq!(map.get(&path).unwrap().line.as_deref(), Some("# motd"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_multiline_scalars_are_opaque() {
        let doc = "\
machine:
  # banner
  motd: \"first line
    note: still the banner
    # and so is this\"
  kernel:
    args: plain text that
      - keeps going here
  # disk
  install:
    disk: /dev/sda # root
";
        let map = copy_comments(doc);
        let machine = YamlPath::root().key("machine");
        assert_eq!(map.get(&machine.key("motd")).unwrap().head, vec!["# banner"]);
        assert_eq!(map.get(&machine.key("install")).unwrap().head, vec!["# disk"]);
        assert_eq!(
            map.get(&machine.key("install").key("disk")).unwrap().line.as_deref(),
            Some("# root")
        );
        assert!(map.get(&machine.key("kernel")).is_none());
        assert_eq!(map.len(), 3);

        let bare = doc
            .lines()
            .filter(|l| !matches!(l.trim(), "# banner" | "# disk"))
            .map(|l| l.trim_end_matches(" # root"))
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        assert_eq!(apply_comments(&bare, &map), doc);
    }

    #[test]
    fn test_open_scalar() {
        assert_eq!(open_scalar(2, "|"), Some(OpenScalar::Block(2)));
        assert_eq!(open_scalar(2, "&anchor >-"), Some(OpenScalar::Block(2)));
        assert_eq!(open_scalar(2, "\"unterminated"), Some(OpenScalar::Double));
        assert_eq!(open_scalar(2, "'it''s open"), Some(OpenScalar::Single));
        assert_eq!(open_scalar(2, "\"closed\""), None);
        assert_eq!(open_scalar(2, "plain"), Some(OpenScalar::Plain(2)));
        assert_eq!(open_scalar(2, "&anchor"), None);
        assert_eq!(open_scalar(2, "[a, b]"), None);
        assert_eq!(open_scalar(2, ""), None);
    }

    #[test]
    fn test_hash_inside_values() {
        assert_eq!(split_comment("url: http://x/#frag"), ("url: http://x/#frag", None));
        assert_eq!(split_comment("a: 'x # y' # z"), ("a: 'x # y'", Some("# z")));
        assert_eq!(split_comment("a: \"q\\\" # \" # z"), ("a: \"q\\\" # \"", Some("# z")));
        assert_eq!(split_comment("a: it's # z"), ("a: it's", Some("# z")));
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("type: worker"), Some(("type".to_string(), "worker")));
        assert_eq!(split_key("network:"), Some(("network".to_string(), "")));
        assert_eq!(split_key("\"a: b\": c"), Some(("a: b".to_string(), "c")));
        assert_eq!(split_key("http://example.com"), None);
        assert_eq!(split_key("[a, b]"), None);
    }

    #[test]
    fn test_merge_comments_keeps_new_header() {
        let old = Modeline::new(vec!["10.0.0.1".into()], vec![], vec![]).wrap(
            "machine:\n  # pinned disk\n  install:\n    disk: /dev/sda\n",
        );
        let new = Modeline::new(vec!["10.0.0.2".into()], vec![], vec![])
            .wrap("machine:\n  install:\n    disk: /dev/nvme0n1\n");

        let merged = merge_comments(&old, &new);
        let (modeline, body) = split_header(&merged);
        assert_eq!(modeline.unwrap().nodes, vec!["10.0.0.2"]);
        assert_eq!(
            body,
            "machine:\n  # pinned disk\n  install:\n    disk: /dev/nvme0n1\n"
        );
    }

    #[test]
    fn test_merge_comments_without_header() {
        let merged = merge_comments("# hi\nmachine: {}\n", "machine: {}\n");
        assert_eq!(merged, "# hi\nmachine: {}\n");
    }
}
