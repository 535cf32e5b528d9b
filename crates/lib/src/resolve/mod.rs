//! Substituting references in YAML with published digests.
//!
//! # Submodules
//!
//! - [`walker`] - Finds reference-like strings in a document
//! - [`selector`] - Label selectors applied before resolution
//! - [`engine`] - Resolves one set of documents
//! - [`stream`] - Resolves many files with ordered output
//! - [`watch`] - Re-resolution on source changes

pub mod engine;
pub mod selector;
pub mod stream;
pub mod walker;
pub mod watch;

use std::io;

use thiserror::Error;

use crate::build::BuildError;
use crate::publish::PublishError;

pub use engine::{ResolveOptions, resolve_documents};
pub use selector::Selector;
pub use stream::{FileResolver, Mode, ResolvedFile, enumerate_inputs};
pub use walker::{Found, NodePath, find, node_mut};
pub use watch::{DependencyGraph, watch};

/// Errors that can occur while resolving documents.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// A strict reference the builder cannot build.
  #[error("unsupported reference {reference}: {source}")]
  Unsupported {
    reference: String,
    #[source]
    source: BuildError,
  },

  #[error("failed to build {reference}: {source}")]
  Build {
    reference: String,
    #[source]
    source: BuildError,
  },

  #[error("failed to publish {reference}: {source}")]
  Publish {
    reference: String,
    #[source]
    source: PublishError,
  },

  #[error("invalid label selector {0}")]
  Selector(String),

  #[error("failed to parse {path}: {message}")]
  Yaml { path: String, message: String },

  #[error("io error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("resolution task failed: {0}")]
  Task(String),

  #[error("resolution cancelled")]
  Cancelled,
}

impl ResolveError {
  /// Whether this error only reports that the work was cancelled.
  pub fn is_cancelled(&self) -> bool {
    matches!(
      self,
      ResolveError::Cancelled
        | ResolveError::Build {
          source: BuildError::Cancelled,
          ..
        }
        | ResolveError::Publish {
          source: PublishError::Cancelled,
          ..
        }
    )
  }

  pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
    ResolveError::Io {
      path: path.into(),
      source,
    }
  }
}
