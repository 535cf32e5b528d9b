//! Publishing to a registry.
//!
//! Transport and authentication live behind [`RegistryClient`]; this module
//! only decides what gets written under which names.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::namer::Namer;
use super::{PublishError, Publisher, effective_tags};
use crate::image::{Artifact, Attachment};
use crate::reference::Reference;
use crate::util::hash::Digest;

/// The registry operations the publisher and base resolver need.
#[async_trait]
pub trait RegistryClient: Send + Sync {
  /// Fetch the image or index at `reference` (`repo:tag` or `repo@digest`).
  async fn pull(&self, ctx: &CancellationToken, reference: &str) -> Result<Artifact, PublishError>;

  /// Upload `artifact` and point `reference` at it.
  async fn write(&self, ctx: &CancellationToken, reference: &str, artifact: &Artifact) -> Result<(), PublishError>;

  /// Upload an attachment whose subject is `subject` in `repository`.
  async fn write_attachment(
    &self,
    ctx: &CancellationToken,
    repository: &str,
    subject: &Digest,
    attachment: &Attachment,
  ) -> Result<(), PublishError>;
}

pub struct RegistryPublisher {
  client: Arc<dyn RegistryClient>,
  repo: String,
  namer: Namer,
  tags: Vec<String>,
}

impl RegistryPublisher {
  pub fn new(client: Arc<dyn RegistryClient>, repo: &str, namer: Namer, tags: Vec<String>) -> Self {
    Self {
      client,
      repo: repo.to_string(),
      namer,
      tags: effective_tags(&tags),
    }
  }
}

#[async_trait]
impl Publisher for RegistryPublisher {
  async fn publish(
    &self,
    ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    let name = self.namer.name(&self.repo, reference.path());
    let digest = artifact.digest()?;

    for tag in &self.tags {
      if ctx.is_cancelled() {
        return Err(PublishError::Cancelled);
      }
      let target = format!("{}:{}", name, tag);
      debug!(target = %target, "writing to registry");
      self.client.write(ctx, &target, artifact).await?;
    }
    for (image, attachment) in artifact.attachments() {
      let subject = image.digest()?;
      debug!(subject = %subject, attachment = %attachment.name, "writing attachment");
      self.client.write_attachment(ctx, &name, &subject, &attachment).await?;
    }

    let published = format!("{}@{}", name, digest);
    info!(reference = %reference, published = %published, "published to registry");
    Ok(published)
  }

  fn close(&self) -> Result<(), PublishError> {
    Ok(())
  }
}

/// A registry held in memory, keyed by the exact reference written.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
  artifacts: Mutex<BTreeMap<String, Artifact>>,
  attachments: Mutex<Vec<(String, Digest, String)>>,
}

impl MemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// References written so far, sorted.
  pub fn references(&self) -> Vec<String> {
    self.artifacts.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
  }

  /// `(repository, subject, name)` of every attachment written.
  pub fn attachments(&self) -> Vec<(String, Digest, String)> {
    self.attachments.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
  async fn pull(&self, _ctx: &CancellationToken, reference: &str) -> Result<Artifact, PublishError> {
    let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(artifact) = artifacts.get(reference) {
      return Ok(artifact.clone());
    }
    // repo@digest lookups match any tag of that repo pointing at the digest
    if let Some((repo, digest)) = reference.split_once('@') {
      let prefix = format!("{}:", repo);
      for (name, artifact) in artifacts.iter() {
        if name.starts_with(&prefix) && artifact.digest().is_ok_and(|d| d.as_str() == digest) {
          return Ok(artifact.clone());
        }
      }
    }
    Err(PublishError::Registry {
      reference: reference.to_string(),
      message: "manifest unknown".to_string(),
    })
  }

  async fn write(&self, _ctx: &CancellationToken, reference: &str, artifact: &Artifact) -> Result<(), PublishError> {
    self
      .artifacts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(reference.to_string(), artifact.clone());
    Ok(())
  }

  async fn write_attachment(
    &self,
    _ctx: &CancellationToken,
    repository: &str,
    subject: &Digest,
    attachment: &Attachment,
  ) -> Result<(), PublishError> {
    self.attachments.lock().unwrap_or_else(PoisonError::into_inner).push((
      repository.to_string(),
      subject.clone(),
      attachment.name.clone(),
    ));
    Ok(())
  }
}
