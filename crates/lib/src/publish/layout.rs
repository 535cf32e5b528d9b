//! Publishing into an OCI layout directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::namer::Namer;
use super::{PublishError, Publisher, effective_tags};
use crate::cache::promise::Abandoned;
use crate::image::manifest::Manifest;
use crate::image::{Artifact, Attachment, Descriptor, Image, ImageError, Layout, media};
use crate::reference::Reference;
use crate::util::hash::Digest;

/// Writes artifacts and their attachments into a layout, tagging each as
/// `<name>:<tag>` in `index.json`.
pub struct LayoutPublisher {
  layout: Layout,
  namer: Namer,
  tags: Vec<String>,
  // index.json is read-modify-write
  lock: Arc<Mutex<()>>,
}

impl LayoutPublisher {
  pub fn new(root: impl Into<PathBuf>, namer: Namer, tags: Vec<String>) -> Result<Self, PublishError> {
    Ok(Self {
      layout: Layout::init(root)?,
      namer,
      tags: effective_tags(&tags),
      lock: Arc::new(Mutex::new(())),
    })
  }

  pub fn root(&self) -> &Path {
    self.layout.root()
  }
}

/// Tag under which an attachment of `subject` is stored.
pub fn attachment_tag(subject: &Digest, name: &str) -> String {
  format!("sha256-{}.{}", subject.hex(), name)
}

/// Write an attachment as its own manifest whose subject is the image it
/// describes.
fn write_attachment(layout: &Layout, image: &Image, attachment: &Attachment) -> Result<(), ImageError> {
  let subject = Descriptor::for_bytes(&image.media_type, &image.raw_manifest()?);
  let empty = b"{}";
  layout.write_blob(empty)?;
  layout.write_blob(&attachment.payload)?;

  let manifest = Manifest {
    schema_version: 2,
    media_type: media::OCI_MANIFEST.to_string(),
    config: Descriptor::for_bytes(media::OCI_EMPTY, empty),
    layers: vec![Descriptor::for_bytes(&attachment.media_type, &attachment.payload)],
    subject: Some(subject.clone()),
    annotations: Default::default(),
  };
  let raw = serde_json::to_vec(&manifest).map_err(|e| ImageError::encode("attachment manifest", e))?;
  layout.write_blob(&raw)?;
  layout.tag(
    Descriptor::for_bytes(media::OCI_MANIFEST, &raw),
    &attachment_tag(&subject.digest, &attachment.name),
  )
}

#[async_trait]
impl Publisher for LayoutPublisher {
  async fn publish(
    &self,
    _ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    let layout = self.layout.clone();
    let lock = self.lock.clone();
    let artifact = artifact.clone();
    let name = self.namer.name("", reference.path());
    let tags = self.tags.clone();

    let digest = tokio::task::spawn_blocking(move || -> Result<_, ImageError> {
      let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
      let descriptor = layout.write_artifact(&artifact)?;
      for tag in &tags {
        layout.tag(descriptor.clone(), &format!("{}:{}", name, tag))?;
      }
      for (image, attachment) in artifact.attachments() {
        write_attachment(&layout, &image, &attachment)?;
      }
      Ok(descriptor.digest)
    })
    .await
    .map_err(|_| PublishError::Abandoned(Abandoned))??;

    let published = format!("{}@{}", self.layout.root().display(), digest);
    info!(reference = %reference, published = %published, "published to layout");
    Ok(published)
  }

  fn close(&self) -> Result<(), PublishError> {
    Ok(())
  }
}
