//! Images, indices and the artifacts built from them.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::{ConfigFile, History};
use super::layer::Layer;
use super::manifest::{Descriptor, IndexManifest, Manifest};
use super::{ImageError, media};
use crate::platform::Platform;
use crate::util::hash::Digest;

/// Side-channel payload published next to an image (e.g. an SBOM).
///
/// Attachments never contribute to the image digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
  pub name: String,
  pub media_type: String,
  pub payload: Arc<Vec<u8>>,
}

/// A single-platform image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
  pub media_type: String,
  pub config: ConfigFile,
  pub layers: Vec<Layer>,
  pub annotations: BTreeMap<String, String>,
  pub attachments: Vec<Attachment>,
}

impl Image {
  /// An empty OCI image for `platform`.
  pub fn scratch(platform: &Platform) -> Self {
    Self {
      media_type: media::OCI_MANIFEST.to_string(),
      config: ConfigFile::for_platform(platform),
      layers: Vec::new(),
      annotations: BTreeMap::new(),
      attachments: Vec::new(),
    }
  }

  pub fn platform(&self) -> Platform {
    self.config.platform()
  }

  pub fn config_media_type(&self) -> &'static str {
    media::config_for(&self.media_type)
  }

  /// Append a layer, recording its diff id and a history entry.
  pub fn append_layer(&mut self, layer: Layer, history: History) {
    self.config.rootfs.diff_ids.push(layer.diff_id.clone());
    self.config.history.push(history);
    self.layers.push(layer);
  }

  pub fn with_attachment(mut self, attachment: Attachment) -> Self {
    self.attachments.push(attachment);
    self
  }

  pub fn raw_config(&self) -> Result<Vec<u8>, ImageError> {
    serde_json::to_vec(&self.config).map_err(|e| ImageError::encode("config", e))
  }

  pub fn manifest(&self) -> Result<Manifest, ImageError> {
    let raw_config = self.raw_config()?;
    Ok(Manifest {
      schema_version: 2,
      media_type: self.media_type.clone(),
      config: Descriptor::for_bytes(self.config_media_type(), &raw_config),
      layers: self.layers.iter().map(Layer::descriptor).collect(),
      subject: None,
      annotations: self.annotations.clone(),
    })
  }

  pub fn raw_manifest(&self) -> Result<Vec<u8>, ImageError> {
    serde_json::to_vec(&self.manifest()?).map_err(|e| ImageError::encode("manifest", e))
  }

  pub fn digest(&self) -> Result<Digest, ImageError> {
    Ok(Digest::of(&self.raw_manifest()?))
  }
}

/// One child of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
  pub artifact: Artifact,
  pub platform: Option<Platform>,
  pub annotations: BTreeMap<String, String>,
}

/// A collection of per-platform artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageIndex {
  pub media_type: String,
  pub entries: Vec<IndexEntry>,
  pub annotations: BTreeMap<String, String>,
}

impl ImageIndex {
  pub fn new(media_type: &str) -> Self {
    Self {
      media_type: media_type.to_string(),
      entries: Vec::new(),
      annotations: BTreeMap::new(),
    }
  }

  pub fn manifest(&self) -> Result<IndexManifest, ImageError> {
    let manifests = self
      .entries
      .iter()
      .map(|entry| {
        let mut descriptor = entry.artifact.descriptor()?;
        descriptor.platform = entry.platform.clone();
        descriptor.annotations = entry.annotations.clone();
        Ok(descriptor)
      })
      .collect::<Result<Vec<_>, ImageError>>()?;

    Ok(IndexManifest {
      schema_version: 2,
      media_type: self.media_type.clone(),
      manifests,
      annotations: self.annotations.clone(),
    })
  }

  pub fn raw_manifest(&self) -> Result<Vec<u8>, ImageError> {
    serde_json::to_vec(&self.manifest()?).map_err(|e| ImageError::encode("index", e))
  }

  pub fn digest(&self) -> Result<Digest, ImageError> {
    Ok(Digest::of(&self.raw_manifest()?))
  }

  /// Every image reachable from this index, depth first.
  pub fn images(&self) -> Vec<Arc<Image>> {
    let mut out = Vec::new();
    for entry in &self.entries {
      match &entry.artifact {
        Artifact::Image(image) => out.push(image.clone()),
        Artifact::Index(index) => out.extend(index.images()),
      }
    }
    out
  }
}

/// The output of a build: a single image or an index of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
  Image(Arc<Image>),
  Index(Arc<ImageIndex>),
}

impl Artifact {
  pub fn media_type(&self) -> &str {
    match self {
      Artifact::Image(image) => &image.media_type,
      Artifact::Index(index) => &index.media_type,
    }
  }

  pub fn raw_manifest(&self) -> Result<Vec<u8>, ImageError> {
    match self {
      Artifact::Image(image) => image.raw_manifest(),
      Artifact::Index(index) => index.raw_manifest(),
    }
  }

  pub fn digest(&self) -> Result<Digest, ImageError> {
    Ok(Digest::of(&self.raw_manifest()?))
  }

  pub fn descriptor(&self) -> Result<Descriptor, ImageError> {
    let raw = self.raw_manifest()?;
    Ok(Descriptor::for_bytes(self.media_type(), &raw))
  }

  pub fn is_index(&self) -> bool {
    matches!(self, Artifact::Index(_))
  }

  /// Attachments of this artifact and, for an index, of its children.
  pub fn attachments(&self) -> Vec<(Arc<Image>, Attachment)> {
    let images = match self {
      Artifact::Image(image) => vec![image.clone()],
      Artifact::Index(index) => index.images(),
    };
    images
      .into_iter()
      .flat_map(|image| {
        image
          .attachments
          .iter()
          .cloned()
          .map(|a| (image.clone(), a))
          .collect::<Vec<_>>()
      })
      .collect()
  }
}

impl From<Image> for Artifact {
  fn from(image: Image) -> Self {
    Artifact::Image(Arc::new(image))
  }
}

impl From<ImageIndex> for Artifact {
  fn from(index: ImageIndex) -> Self {
    Artifact::Index(Arc::new(index))
  }
}
