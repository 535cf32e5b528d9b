//! Minimal OCI image model.
//!
//! Images are immutable values: every overlay (a new layer, a label, a
//! timestamp) produces a new [`Image`]. Digests are a pure function of the
//! serialized manifest, which in turn covers the config and layer digests.
//! Attachments ride alongside and never affect the digest.

pub mod config;
pub mod layer;
pub mod layout;
pub mod manifest;
pub mod media;
pub mod tarball;
pub mod types;

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::util::hash::{Digest, DigestError};

pub use config::{ConfigFile, ContainerConfig, History, RootFs};
pub use layer::{Layer, LayerBlob};
pub use layout::Layout;
pub use manifest::{Descriptor, IndexManifest, Manifest};
pub use types::{Artifact, Attachment, Image, ImageIndex, IndexEntry};

/// Errors from reading, writing or encoding images.
///
/// Cloneable so memoized build results can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
  #[error("io error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("failed to encode {what}: {message}")]
  Encode { what: String, message: String },

  #[error("failed to decode {what}: {message}")]
  Decode { what: String, message: String },

  #[error("unsupported media type: {0}")]
  MediaType(String),

  /// The blob is referenced but its bytes are not stored locally.
  #[error("blob {0} is not available locally")]
  BlobUnavailable(Digest),

  #[error("no image named {name:?} in {path}")]
  NotFound { name: String, path: String },

  #[error("config is missing the diff id for layer {index}")]
  MissingDiffId { index: usize },

  #[error(transparent)]
  Digest(#[from] DigestError),
}

impl ImageError {
  pub fn io(path: impl Into<String>, source: io::Error) -> Self {
    ImageError::Io {
      path: path.into(),
      source: Arc::new(source),
    }
  }

  pub fn encode(what: &str, err: impl std::fmt::Display) -> Self {
    ImageError::Encode {
      what: what.to_string(),
      message: err.to_string(),
    }
  }

  pub fn decode(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
    ImageError::Decode {
      what: what.into(),
      message: err.to_string(),
    }
  }
}
