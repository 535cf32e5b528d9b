//! Build references: the logical names of buildable units.
//!
//! A reference is a Go import path, optionally written with the strict
//! `ko://` scheme. The scheme is stripped on parse and remembered as a flag so
//! that the canonical form renders consistently.

use std::fmt;
use std::str::FromStr;

use crate::consts::{DEFAULT_APP_FILENAME, STRICT_SCHEME};

/// A possibly-qualified import path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
  path: String,
  strict: bool,
}

impl Reference {
  /// Parse a raw string, stripping the strict scheme when present.
  pub fn parse(raw: &str) -> Self {
    match raw.strip_prefix(STRICT_SCHEME) {
      Some(path) => Self {
        path: path.to_string(),
        strict: true,
      },
      None => Self {
        path: raw.to_string(),
        strict: false,
      },
    }
  }

  pub fn new(path: impl Into<String>, strict: bool) -> Self {
    Self {
      path: path.into(),
      strict,
    }
  }

  /// The import path without any scheme.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Whether the reference was written with the `ko://` scheme.
  pub fn is_strict(&self) -> bool {
    self.strict
  }

  /// The same path marked strict.
  pub fn to_strict(&self) -> Self {
    Self::new(self.path.clone(), true)
  }

  /// Whether the path is relative to the working directory.
  pub fn is_local(&self) -> bool {
    let p = self.path.as_str();
    p == "." || p == ".." || p.starts_with("./") || p.starts_with("../")
  }

  /// Name of the executable derived from the import path.
  ///
  /// A trailing major-version element (`/v2`) is skipped in favour of its parent.
  pub fn app_name(&self) -> String {
    let mut elements = self.path.trim_end_matches('/').rsplit('/');
    let last = elements.next().unwrap_or_default();
    let name = if is_major_version(last) {
      elements.next().unwrap_or(last)
    } else {
      last
    };
    if name.is_empty() || name == "." || name == ".." {
      DEFAULT_APP_FILENAME.to_string()
    } else {
      name.to_string()
    }
  }
}

fn is_major_version(element: &str) -> bool {
  element
    .strip_prefix('v')
    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl fmt::Display for Reference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.strict {
      write!(f, "{}{}", STRICT_SCHEME, self.path)
    } else {
      write!(f, "{}", self.path)
    }
  }
}

impl FromStr for Reference {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Reference::parse(s))
  }
}
