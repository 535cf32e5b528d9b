//! Label selectors for filtering documents.
//!
//! Supports the equality and set-based forms: `k=v`, `k==v`, `k!=v`, `k`,
//! `!k`, `k in (a,b)` and `k notin (a,b)`, joined with commas. All
//! requirements must hold.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_yaml::Value;

use super::ResolveError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operator {
  Equals(String),
  NotEquals(String),
  Exists,
  NotExists,
  In(Vec<String>),
  NotIn(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
  key: String,
  operator: Operator,
}

impl Requirement {
  fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
    let value = labels.get(&self.key);
    match &self.operator {
      Operator::Equals(v) => value == Some(v),
      Operator::NotEquals(v) => value != Some(v),
      Operator::Exists => value.is_some(),
      Operator::NotExists => value.is_none(),
      Operator::In(set) => value.is_some_and(|v| set.contains(v)),
      Operator::NotIn(set) => value.is_none_or(|v| !set.contains(v)),
    }
  }
}

/// A parsed label selector. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
  requirements: Vec<Requirement>,
}

impl Selector {
  pub fn parse(text: &str) -> Result<Self, ResolveError> {
    let requirements = split_top_level(text)
      .into_iter()
      .map(str::trim)
      .filter(|part| !part.is_empty())
      .map(parse_requirement)
      .collect::<Result<_, _>>()?;
    Ok(Self { requirements })
  }

  pub fn is_empty(&self) -> bool {
    self.requirements.is_empty()
  }

  pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
    self.requirements.iter().all(|r| r.matches(labels))
  }

  /// Match against a document's `metadata.labels`. Documents without labels
  /// have an empty label set.
  pub fn matches_document(&self, doc: &Value) -> bool {
    if self.is_empty() {
      return true;
    }
    self.matches(&document_labels(doc))
  }
}

impl FromStr for Selector {
  type Err = ResolveError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Selector::parse(s)
  }
}

impl fmt::Display for Selector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self
      .requirements
      .iter()
      .map(|r| match &r.operator {
        Operator::Equals(v) => format!("{}={}", r.key, v),
        Operator::NotEquals(v) => format!("{}!={}", r.key, v),
        Operator::Exists => r.key.clone(),
        Operator::NotExists => format!("!{}", r.key),
        Operator::In(set) => format!("{} in ({})", r.key, set.join(",")),
        Operator::NotIn(set) => format!("{} notin ({})", r.key, set.join(",")),
      })
      .collect();
    write!(f, "{}", parts.join(","))
  }
}

fn document_labels(doc: &Value) -> BTreeMap<String, String> {
  let Some(Value::Mapping(labels)) = doc.get("metadata").and_then(|m| m.get("labels")) else {
    return BTreeMap::new();
  };
  labels
    .iter()
    .filter_map(|(k, v)| {
      let key = k.as_str()?;
      let value = match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
      };
      Some((key.to_string(), value))
    })
    .collect()
}

/// Split on commas outside parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut depth = 0usize;
  let mut start = 0;
  for (i, c) in text.char_indices() {
    match c {
      '(' => depth += 1,
      ')' => depth = depth.saturating_sub(1),
      ',' if depth == 0 => {
        parts.push(&text[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  parts.push(&text[start..]);
  parts
}

fn invalid(part: &str, reason: &str) -> ResolveError {
  ResolveError::Selector(format!("{:?}: {}", part, reason))
}

fn valid_key(key: &str) -> bool {
  !key.is_empty()
    && key
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

fn parse_requirement(part: &str) -> Result<Requirement, ResolveError> {
  if let Some(key) = part.strip_prefix('!') {
    let key = key.trim();
    if !valid_key(key) {
      return Err(invalid(part, "invalid key"));
    }
    return Ok(Requirement {
      key: key.to_string(),
      operator: Operator::NotExists,
    });
  }

  for (token, negate) in [(" notin ", true), (" in ", false)] {
    if let Some((key, set)) = part.split_once(token) {
      let key = key.trim();
      if !valid_key(key) {
        return Err(invalid(part, "invalid key"));
      }
      let set = set
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| invalid(part, "expected a parenthesized set"))?;
      let values: Vec<String> = set
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
      let operator = if negate {
        Operator::NotIn(values)
      } else {
        Operator::In(values)
      };
      return Ok(Requirement {
        key: key.to_string(),
        operator,
      });
    }
  }

  let (key, operator) = if let Some((k, v)) = part.split_once("!=") {
    (k, Operator::NotEquals(v.trim().to_string()))
  } else if let Some((k, v)) = part.split_once("==") {
    (k, Operator::Equals(v.trim().to_string()))
  } else if let Some((k, v)) = part.split_once('=') {
    (k, Operator::Equals(v.trim().to_string()))
  } else {
    (part, Operator::Exists)
  };
  let key = key.trim();
  if !valid_key(key) {
    return Err(invalid(part, "invalid key"));
  }
  Ok(Requirement {
    key: key.to_string(),
    operator,
  })
}
