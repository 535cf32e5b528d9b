//! Publishing built artifacts.
//!
//! Every destination implements [`Publisher`] and returns the digest reference
//! a document should point at. The set of destinations is closed: see
//! [`Destination`].

pub mod daemon;
pub mod layout;
pub mod namer;
pub mod registry;
pub mod tarball;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::promise::Abandoned;
use crate::image::{Artifact, ImageError};
use crate::reference::Reference;

pub use daemon::DaemonPublisher;
pub use layout::LayoutPublisher;
pub use namer::Namer;
pub use registry::{MemoryRegistry, RegistryClient, RegistryPublisher};
pub use tarball::TarballPublisher;

/// Tags applied when none are configured.
pub const DEFAULT_TAGS: [&str; 1] = ["latest"];

/// Pushes an artifact somewhere and reports where it went.
#[async_trait]
pub trait Publisher: Send + Sync {
  /// Publish `artifact` built from `reference`. Returns a digest reference.
  async fn publish(
    &self,
    ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError>;

  /// Flush anything buffered. Called once after the last publish.
  fn close(&self) -> Result<(), PublishError>;
}

/// Errors that can occur while publishing.
///
/// Cloneable so a memoized failure can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
  #[error(transparent)]
  Image(#[from] ImageError),

  /// The destination cannot hold this kind of artifact.
  #[error("{destination} cannot publish {reference}: {reason}")]
  Unsupported {
    destination: String,
    reference: String,
    reason: String,
  },

  #[error("docker load failed: {0}")]
  Daemon(String),

  #[error("registry error for {reference}: {message}")]
  Registry { reference: String, message: String },

  #[error("io error: {0}")]
  Io(Arc<io::Error>),

  #[error("publish cancelled")]
  Cancelled,

  #[error(transparent)]
  Abandoned(#[from] Abandoned),
}

impl From<io::Error> for PublishError {
  fn from(err: io::Error) -> Self {
    PublishError::Io(Arc::new(err))
  }
}

/// The supported destinations.
pub enum Destination {
  Layout(LayoutPublisher),
  Tarball(TarballPublisher),
  Daemon(DaemonPublisher),
  Registry(RegistryPublisher),
  /// Publish to each in order; the last reference returned wins.
  Multi(Vec<Destination>),
}

#[async_trait]
impl Publisher for Destination {
  async fn publish(
    &self,
    ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    match self {
      Destination::Layout(p) => p.publish(ctx, artifact, reference).await,
      Destination::Tarball(p) => p.publish(ctx, artifact, reference).await,
      Destination::Daemon(p) => p.publish(ctx, artifact, reference).await,
      Destination::Registry(p) => p.publish(ctx, artifact, reference).await,
      Destination::Multi(destinations) => {
        let mut last = None;
        for destination in destinations {
          let published = destination.publish(ctx, artifact, reference).await?;
          debug!(reference = %reference, published = %published, "published to destination");
          last = Some(published);
        }
        last.ok_or_else(|| PublishError::Unsupported {
          destination: "multi".to_string(),
          reference: reference.to_string(),
          reason: "no destinations configured".to_string(),
        })
      }
    }
  }

  fn close(&self) -> Result<(), PublishError> {
    match self {
      Destination::Layout(p) => p.close(),
      Destination::Tarball(p) => p.close(),
      Destination::Daemon(p) => p.close(),
      Destination::Registry(p) => p.close(),
      Destination::Multi(destinations) => {
        let mut first_error = None;
        for destination in destinations {
          if let Err(e) = destination.close() {
            first_error.get_or_insert(e);
          }
        }
        first_error.map_or(Ok(()), Err)
      }
    }
  }
}

/// Tags to apply: the configured ones, or [`DEFAULT_TAGS`].
pub(crate) fn effective_tags(tags: &[String]) -> Vec<String> {
  if tags.is_empty() {
    DEFAULT_TAGS.iter().map(|t| t.to_string()).collect()
  } else {
    tags.to_vec()
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::image::Image;
  use crate::platform::Platform;

  #[tokio::test]
  async fn multi_returns_last_reference() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let multi = Destination::Multi(vec![
      Destination::Layout(LayoutPublisher::new(first.path(), Namer::Default, Vec::new()).unwrap()),
      Destination::Layout(LayoutPublisher::new(second.path(), Namer::Default, Vec::new()).unwrap()),
    ]);
    let artifact = Artifact::from(Image::scratch(&Platform::default_target()));
    let published = multi
      .publish(
        &CancellationToken::new(),
        &artifact,
        &Reference::parse("ko://example.com/app"),
      )
      .await
      .unwrap();
    assert!(published.starts_with(&second.path().display().to_string()));
    assert!(published.ends_with(artifact.digest().unwrap().as_str()));
    multi.close().unwrap();
  }

  #[tokio::test]
  async fn empty_multi_is_an_error() {
    let multi = Destination::Multi(Vec::new());
    let artifact = Artifact::from(Image::scratch(&Platform::default_target()));
    let result = multi
      .publish(&CancellationToken::new(), &artifact, &Reference::parse("x"))
      .await;
    assert!(result.is_err());
  }

  #[test]
  fn default_tags() {
    assert_eq!(effective_tags(&[]), vec!["latest".to_string()]);
    assert_eq!(effective_tags(&["v1".to_string()]), vec!["v1".to_string()]);
  }
}
