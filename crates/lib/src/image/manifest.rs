//! Wire documents: descriptors, image manifests and index manifests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::util::hash::Digest;

/// A typed, sized pointer to a blob or manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
  pub media_type: String,
  pub digest: Digest,
  pub size: u64,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<Platform>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
  pub fn new(media_type: &str, digest: Digest, size: u64) -> Self {
    Self {
      media_type: media_type.to_string(),
      digest,
      size,
      platform: None,
      annotations: BTreeMap::new(),
    }
  }

  /// Descriptor for an in-memory blob.
  pub fn for_bytes(media_type: &str, bytes: &[u8]) -> Self {
    Self::new(media_type, Digest::of(bytes), bytes.len() as u64)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub schema_version: u32,
  pub media_type: String,
  pub config: Descriptor,
  pub layers: Vec<Descriptor>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subject: Option<Descriptor>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
  pub schema_version: u32,

  #[serde(default)]
  pub media_type: String,

  pub manifests: Vec<Descriptor>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub annotations: BTreeMap<String, String>,
}

/// Just enough of any manifest to tell which kind it is.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaTypeSniff {
  #[serde(default)]
  pub media_type: Option<String>,
  #[serde(default)]
  pub manifests: Option<serde_json::Value>,
}
