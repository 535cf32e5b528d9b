//! Finding references inside YAML documents.
//!
//! The walker is read-only: it yields [`NodePath`] handles that can be
//! replayed against the document with [`node_mut`] once results are known.

use std::fmt;

use serde_yaml::Value;

use crate::reference::Reference;

/// One step from a node to a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
  /// A mapping value, addressed by its key.
  Key(Value),
  /// A sequence item.
  Index(usize),
  /// The value inside a tagged node.
  Tagged,
}

/// Location of a node relative to the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<Segment>);

impl NodePath {
  pub fn root() -> Self {
    Self::default()
  }

  pub fn segments(&self) -> &[Segment] {
    &self.0
  }

  fn child(&self, segment: Segment) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment);
    Self(segments)
  }
}

impl fmt::Display for NodePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      return write!(f, ".");
    }
    for segment in &self.0 {
      match segment {
        Segment::Key(Value::String(key)) => write!(f, ".{}", key)?,
        Segment::Key(key) => write!(f, ".{:?}", key)?,
        Segment::Index(i) => write!(f, "[{}]", i)?,
        Segment::Tagged => write!(f, "!")?,
      }
    }
    Ok(())
  }
}

/// A string scalar that may name a buildable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
  pub path: NodePath,
  pub reference: Reference,
}

impl Found {
  /// The reference text with any `ko://` scheme stripped.
  pub fn value(&self) -> &str {
    self.reference.path()
  }
}

/// Lazy depth-first iterator over candidate references in document order.
pub struct Finder<'a> {
  stack: Vec<(NodePath, &'a Value)>,
  strict: bool,
}

/// Walk `doc`, yielding every string scalar in mapping values, sequence items
/// and tagged values. In strict mode only `ko://` strings are yielded.
pub fn find(doc: &Value, strict: bool) -> Finder<'_> {
  Finder {
    stack: vec![(NodePath::root(), doc)],
    strict,
  }
}

impl Iterator for Finder<'_> {
  type Item = Found;

  fn next(&mut self) -> Option<Found> {
    while let Some((path, node)) = self.stack.pop() {
      match node {
        Value::String(s) => {
          let reference = Reference::parse(s);
          if !self.strict || reference.is_strict() {
            return Some(Found { path, reference });
          }
        }
        Value::Sequence(items) => {
          for (i, item) in items.iter().enumerate().rev() {
            self.stack.push((path.child(Segment::Index(i)), item));
          }
        }
        Value::Mapping(mapping) => {
          let entries: Vec<_> = mapping.iter().collect();
          for (key, value) in entries.into_iter().rev() {
            self.stack.push((path.child(Segment::Key(key.clone())), value));
          }
        }
        Value::Tagged(tagged) => self.stack.push((path.child(Segment::Tagged), &tagged.value)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
      }
    }
    None
  }
}

/// Follow `path` from `doc` to the node it names.
pub fn node_mut<'a>(doc: &'a mut Value, path: &NodePath) -> Option<&'a mut Value> {
  let mut node = doc;
  for segment in path.segments() {
    node = match (segment, node) {
      (Segment::Key(key), Value::Mapping(mapping)) => mapping.get_mut(key)?,
      (Segment::Index(i), Value::Sequence(items)) => items.get_mut(*i)?,
      (Segment::Tagged, Value::Tagged(tagged)) => &mut tagged.value,
      _ => return None,
    };
  }
  Some(node)
}
