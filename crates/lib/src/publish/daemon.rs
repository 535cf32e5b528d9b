//! Publishing into a local container daemon via `docker load`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::namer::Namer;
use super::tarball::require_image;
use super::{PublishError, Publisher, effective_tags};
use crate::consts::LOCAL_DOMAIN;
use crate::image::Artifact;
use crate::image::tarball::{TarballEntry, write_tarball};
use crate::reference::Reference;

/// Loads images into the local daemon and tags them by digest.
pub struct DaemonPublisher {
  repo: String,
  namer: Namer,
  tags: Vec<String>,
  program: PathBuf,
}

impl DaemonPublisher {
  /// `repo` defaults to `ko.local` when empty.
  pub fn new(repo: &str, namer: Namer, tags: Vec<String>) -> Self {
    let repo = if repo.is_empty() { LOCAL_DOMAIN } else { repo };
    Self {
      repo: repo.to_string(),
      namer,
      tags: effective_tags(&tags),
      program: PathBuf::from("docker"),
    }
  }

  /// Use a different client binary (e.g. `podman`).
  pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
    self.program = program.into();
    self
  }
}

#[async_trait]
impl Publisher for DaemonPublisher {
  async fn publish(
    &self,
    ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    let image = require_image("daemon", artifact, reference)?;
    let name = self.namer.name(&self.repo, reference.path());
    let digest = image.digest()?;
    let by_digest = format!("{}:{}", name, digest.hex());

    let mut tags = vec![by_digest.clone()];
    tags.extend(self.tags.iter().map(|t| format!("{}:{}", name, t)));
    let mut tarball = Vec::new();
    write_tarball(
      &mut tarball,
      &[TarballEntry {
        image: image.clone(),
        tags,
      }],
    )?;

    let mut child = Command::new(&self.program)
      .arg("load")
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;
    debug!(program = %self.program.display(), bytes = tarball.len(), "piping image into daemon");

    // a client that stops reading must not outlive cancellation
    let stdin = child.stdin.take();
    let load = async move {
      if let Some(mut stdin) = stdin {
        stdin.write_all(&tarball).await?;
        stdin.shutdown().await?;
      }
      child.wait_with_output().await
    };
    let output = tokio::select! {
      output = load => output?,
      _ = ctx.cancelled() => return Err(PublishError::Cancelled),
    };
    if !output.status.success() {
      return Err(PublishError::Daemon(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    info!(reference = %reference, published = %by_digest, "loaded into daemon");
    Ok(by_digest)
  }

  fn close(&self) -> Result<(), PublishError> {
    Ok(())
  }
}
