//! OCI image layout directories.
//!
//! ```text
//! <root>/
//! ├── oci-layout          layout version marker
//! ├── index.json          top-level index, tagged via ref.name annotations
//! └── blobs/sha256/<hex>  manifests, configs and layers
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::config::ConfigFile;
use super::layer::{Layer, LayerBlob};
use super::manifest::{Descriptor, IndexManifest, Manifest, MediaTypeSniff};
use super::types::{Artifact, Image, ImageIndex, IndexEntry};
use super::{ImageError, media};
use crate::util::hash::Digest;

pub const LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

const LAYOUT_VERSION: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Handle on a layout directory.
#[derive(Debug, Clone)]
pub struct Layout {
  root: PathBuf,
}

impl Layout {
  /// Open an existing layout without touching the filesystem.
  pub fn open(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Open a layout, creating the marker, blob directory and an empty index if
  /// they do not exist yet.
  pub fn init(root: impl Into<PathBuf>) -> Result<Self, ImageError> {
    let layout = Self::open(root);
    let blobs = layout.root.join("blobs").join("sha256");
    fs::create_dir_all(&blobs).map_err(|e| ImageError::io(blobs.display().to_string(), e))?;

    let marker = layout.root.join(LAYOUT_FILE);
    if !marker.exists() {
      write_file(&marker, LAYOUT_VERSION.as_bytes())?;
    }
    if !layout.index_path().exists() {
      layout.write_index(&IndexManifest {
        schema_version: 2,
        media_type: media::OCI_INDEX.to_string(),
        manifests: Vec::new(),
        annotations: Default::default(),
      })?;
    }
    Ok(layout)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn blob_path(&self, digest: &Digest) -> PathBuf {
    self.root.join("blobs").join("sha256").join(digest.hex())
  }

  fn index_path(&self) -> PathBuf {
    self.root.join(INDEX_FILE)
  }

  pub fn read_index(&self) -> Result<IndexManifest, ImageError> {
    let path = self.index_path();
    let raw = fs::read(&path).map_err(|e| ImageError::io(path.display().to_string(), e))?;
    serde_json::from_slice(&raw).map_err(|e| ImageError::decode(path.display().to_string(), e))
  }

  fn write_index(&self, index: &IndexManifest) -> Result<(), ImageError> {
    let raw = serde_json::to_vec_pretty(index).map_err(|e| ImageError::encode("index.json", e))?;
    write_file(&self.index_path(), &raw)
  }

  pub fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, ImageError> {
    let path = self.blob_path(digest);
    fs::read(&path).map_err(|e| ImageError::io(path.display().to_string(), e))
  }

  /// Store a blob under its digest. Existing blobs are left untouched.
  pub fn write_blob(&self, bytes: &[u8]) -> Result<Digest, ImageError> {
    let digest = Digest::of(bytes);
    let path = self.blob_path(&digest);
    if !path.exists() {
      write_file(&path, bytes)?;
    }
    Ok(digest)
  }

  /// Write every blob and manifest of an artifact. Returns its descriptor.
  pub fn write_artifact(&self, artifact: &Artifact) -> Result<Descriptor, ImageError> {
    match artifact {
      Artifact::Image(image) => self.write_image(image),
      Artifact::Index(index) => {
        for entry in &index.entries {
          self.write_artifact(&entry.artifact)?;
        }
        let raw = index.raw_manifest()?;
        self.write_blob(&raw)?;
        Ok(Descriptor::for_bytes(&index.media_type, &raw))
      }
    }
  }

  fn write_image(&self, image: &Image) -> Result<Descriptor, ImageError> {
    for layer in &image.layers {
      if self.blob_path(&layer.digest).exists() {
        continue;
      }
      self.write_blob(&layer.compressed()?)?;
    }
    self.write_blob(&image.raw_config()?)?;
    let raw = image.raw_manifest()?;
    self.write_blob(&raw)?;
    debug!(digest = %Digest::of(&raw), root = %self.root.display(), "wrote image to layout");
    Ok(Descriptor::for_bytes(&image.media_type, &raw))
  }

  /// Point `name` at `descriptor` in `index.json`, replacing any previous
  /// entry with the same name.
  pub fn tag(&self, mut descriptor: Descriptor, name: &str) -> Result<(), ImageError> {
    let mut index = self.read_index()?;
    index
      .manifests
      .retain(|d| d.annotations.get(REF_NAME_ANNOTATION).map(String::as_str) != Some(name));
    descriptor
      .annotations
      .insert(REF_NAME_ANNOTATION.to_string(), name.to_string());
    index.manifests.push(descriptor);
    self.write_index(&index)
  }

  /// Load the artifact tagged `name`, or with digest `name` if it parses as one.
  /// An empty name selects the only entry of a single-entry layout.
  pub fn load(&self, name: &str) -> Result<Artifact, ImageError> {
    let index = self.read_index()?;
    let wanted_digest = name.parse::<Digest>().ok();
    let found = index.manifests.iter().find(|d| {
      if name.is_empty() {
        return index.manifests.len() == 1;
      }
      match &wanted_digest {
        Some(digest) => &d.digest == digest,
        None => d.annotations.get(REF_NAME_ANNOTATION).map(String::as_str) == Some(name),
      }
    });
    match found {
      Some(descriptor) => self.load_descriptor(descriptor),
      None => Err(ImageError::NotFound {
        name: name.to_string(),
        path: self.root.display().to_string(),
      }),
    }
  }

  /// Load the artifact a descriptor points at, recursing through indices.
  pub fn load_descriptor(&self, descriptor: &Descriptor) -> Result<Artifact, ImageError> {
    let raw = self.read_blob(&descriptor.digest)?;
    let sniff: MediaTypeSniff =
      serde_json::from_slice(&raw).map_err(|e| ImageError::decode(descriptor.digest.as_str(), e))?;
    let media_type = sniff
      .media_type
      .filter(|m| !m.is_empty())
      .unwrap_or_else(|| descriptor.media_type.clone());

    if media::is_index(&media_type) || (media_type.is_empty() && sniff.manifests.is_some()) {
      let manifest: IndexManifest =
        serde_json::from_slice(&raw).map_err(|e| ImageError::decode(descriptor.digest.as_str(), e))?;
      let mut index = ImageIndex::new(&media_type);
      index.annotations = manifest.annotations;
      for child in &manifest.manifests {
        index.entries.push(IndexEntry {
          artifact: self.load_descriptor(child)?,
          platform: child.platform.clone(),
          annotations: child.annotations.clone(),
        });
      }
      return Ok(Artifact::Index(Arc::new(index)));
    }

    if !media::is_manifest(&media_type) {
      return Err(ImageError::MediaType(media_type));
    }

    let manifest: Manifest =
      serde_json::from_slice(&raw).map_err(|e| ImageError::decode(descriptor.digest.as_str(), e))?;
    let raw_config = self.read_blob(&manifest.config.digest)?;
    let config: ConfigFile =
      serde_json::from_slice(&raw_config).map_err(|e| ImageError::decode(manifest.config.digest.as_str(), e))?;

    let mut layers = Vec::with_capacity(manifest.layers.len());
    for (index, layer_descriptor) in manifest.layers.iter().enumerate() {
      let diff_id = config
        .rootfs
        .diff_ids
        .get(index)
        .cloned()
        .ok_or(ImageError::MissingDiffId { index })?;
      let path = self.blob_path(&layer_descriptor.digest);
      let blob = if path.exists() {
        LayerBlob::File(path)
      } else {
        LayerBlob::Remote
      };
      layers.push(Layer::from_descriptor(layer_descriptor, diff_id, blob));
    }

    Ok(Artifact::Image(Arc::new(Image {
      media_type,
      config,
      layers,
      annotations: manifest.annotations,
      attachments: Vec::new(),
    })))
  }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| ImageError::io(parent.display().to_string(), e))?;
  }
  fs::write(path, bytes).map_err(|e| ImageError::io(path.display().to_string(), e))
}
