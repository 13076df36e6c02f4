//! Structural paths into YAML trees

use serde_yaml::{Mapping, Value};
use std::fmt;

/// One step of a structural path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Path from the document root to a node, e.g. `machine.network.interfaces[0]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YamlPath(Vec<Segment>);

impl YamlPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Key(key.into()));
        next
    }

    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Index(index));
        next
    }

    /// Node at this path, if present
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(root, |node, segment| match segment {
            Segment::Key(key) => node.as_mapping()?.get(key.as_str()),
            Segment::Index(idx) => node.as_sequence()?.get(*idx),
        })
    }
}

impl fmt::Display for YamlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// Shape of a YAML node: scalar, sequence or mapping
///
/// Tagged values are viewed through their inner value.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Scalar(&'a Value),
    Sequence(&'a [Value]),
    Mapping(&'a Mapping),
}

impl<'a> Node<'a> {
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::Sequence(seq) => Node::Sequence(seq),
            Value::Mapping(map) => Node::Mapping(map),
            Value::Tagged(tagged) => Node::of(&tagged.value),
            scalar => Node::Scalar(scalar),
        }
    }
}

/// Structural equality: mappings ignore key order, sequences compare by index
pub fn equivalent(a: &Value, b: &Value) -> bool {
    match (Node::of(a), Node::of(b)) {
        (Node::Mapping(x), Node::Mapping(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| equivalent(value, other)))
        }
        (Node::Sequence(x), Node::Sequence(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| equivalent(l, r))
        }
        (Node::Scalar(x), Node::Scalar(y)) => x == y,
        _ => false,
    }
}

/// Parse the first document of a YAML stream (`Null` when empty)
pub fn parse_first_document(text: &str) -> Result<Value, serde_yaml::Error> {
    use serde::Deserialize;

    let normalized = text.replace("\r\n", "\n");
    match serde_yaml::Deserializer::from_str(&normalized).next() {
        Some(document) => Value::deserialize(document),
        None => Ok(Value::Null),
    }
}
