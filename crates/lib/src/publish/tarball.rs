//! Publishing into a `docker save` tarball.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::namer::Namer;
use super::{PublishError, Publisher, effective_tags};
use crate::image::Artifact;
use crate::image::tarball::{TarballEntry, write_tarball};
use crate::reference::Reference;

/// Collects images and writes them all to one tarball on [`close`](Publisher::close).
pub struct TarballPublisher {
  path: PathBuf,
  repo: String,
  namer: Namer,
  tags: Vec<String>,
  entries: Mutex<Vec<TarballEntry>>,
}

impl TarballPublisher {
  pub fn new(path: impl Into<PathBuf>, repo: &str, namer: Namer, tags: Vec<String>) -> Self {
    Self {
      path: path.into(),
      repo: repo.to_string(),
      namer,
      tags: effective_tags(&tags),
      entries: Mutex::new(Vec::new()),
    }
  }
}

/// Images only: the docker-save format has no notion of an index.
pub(crate) fn require_image<'a>(
  destination: &str,
  artifact: &'a Artifact,
  reference: &Reference,
) -> Result<&'a Arc<crate::image::Image>, PublishError> {
  match artifact {
    Artifact::Image(image) => Ok(image),
    Artifact::Index(_) => Err(PublishError::Unsupported {
      destination: destination.to_string(),
      reference: reference.to_string(),
      reason: "image indices are not supported".to_string(),
    }),
  }
}

#[async_trait]
impl Publisher for TarballPublisher {
  async fn publish(
    &self,
    _ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    let image = require_image("tarball", artifact, reference)?;
    let name = self.namer.name(&self.repo, reference.path());
    let digest = image.digest()?;

    let tags = self.tags.iter().map(|t| format!("{}:{}", name, t)).collect();
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(TarballEntry {
        image: image.clone(),
        tags,
      });

    let published = format!("{}@{}", name, digest);
    info!(reference = %reference, published = %published, "queued for tarball");
    Ok(published)
  }

  fn close(&self) -> Result<(), PublishError> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    if entries.is_empty() {
      return Ok(());
    }
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(&self.path)?;
    write_tarball(BufWriter::new(file), &entries)?;
    info!(path = %self.path.display(), images = entries.len(), "wrote tarball");
    Ok(())
  }
}
