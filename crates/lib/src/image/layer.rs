//! Compressed filesystem layers.

use std::borrow::Cow;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;

use super::manifest::Descriptor;
use super::{ImageError, media};
use crate::util::hash::Digest;

/// Where a layer's compressed bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerBlob {
  /// Built in this process.
  Memory(Arc<Vec<u8>>),
  /// Stored in a local blob directory (e.g. an OCI layout).
  File(PathBuf),
  /// Referenced by a manifest but not fetched. Publishers that need the bytes
  /// must obtain them from the origin repository.
  Remote,
}

/// A gzip-compressed tar layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
  pub media_type: String,
  /// Digest of the compressed bytes.
  pub digest: Digest,
  /// Digest of the uncompressed tar.
  pub diff_id: Digest,
  pub size: u64,
  pub blob: LayerBlob,
}

impl Layer {
  /// Compress an uncompressed tar stream into an OCI layer.
  ///
  /// The gzip header carries no mtime or file name, so identical tar bytes
  /// always produce identical layer bytes.
  pub fn from_tar(tar: &[u8]) -> Result<Self, ImageError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
      .write_all(tar)
      .map_err(|e| ImageError::io("gzip", e))?;
    let compressed = encoder.finish().map_err(|e| ImageError::io("gzip", e))?;

    Ok(Self {
      media_type: media::OCI_LAYER.to_string(),
      digest: Digest::of(&compressed),
      diff_id: Digest::of(tar),
      size: compressed.len() as u64,
      blob: LayerBlob::Memory(Arc::new(compressed)),
    })
  }

  /// Rebuild a layer from a manifest descriptor plus its config diff id.
  pub fn from_descriptor(descriptor: &Descriptor, diff_id: Digest, blob: LayerBlob) -> Self {
    Self {
      media_type: descriptor.media_type.clone(),
      digest: descriptor.digest.clone(),
      diff_id,
      size: descriptor.size,
      blob,
    }
  }

  /// Same bytes, different media type. Docker and OCI gzip layers are
  /// byte-compatible; only the label changes.
  pub fn with_media_type(mut self, media_type: &str) -> Self {
    self.media_type = media_type.to_string();
    self
  }

  pub fn descriptor(&self) -> Descriptor {
    Descriptor::new(&self.media_type, self.digest.clone(), self.size)
  }

  /// The compressed bytes, if they are available locally.
  pub fn compressed(&self) -> Result<Cow<'_, [u8]>, ImageError> {
    match &self.blob {
      LayerBlob::Memory(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
      LayerBlob::File(path) => std::fs::read(path)
        .map(Cow::Owned)
        .map_err(|e| ImageError::io(path.display().to_string(), e)),
      LayerBlob::Remote => Err(ImageError::BlobUnavailable(self.digest.clone())),
    }
  }
}
