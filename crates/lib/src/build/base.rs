//! Where base images come from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BuildError;
use crate::image::{Artifact, Layout};
use crate::publish::registry::RegistryClient;

/// Resolves a base image reference into an image or index.
#[async_trait]
pub trait BaseSource: Send + Sync {
  async fn fetch(&self, ctx: &CancellationToken, base: &str) -> Result<Artifact, BuildError>;
}

/// Serves bases tagged in a local OCI layout directory.
#[derive(Debug, Clone)]
pub struct LayoutBase {
  layout: Layout,
}

impl LayoutBase {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      layout: Layout::open(root),
    }
  }
}

#[async_trait]
impl BaseSource for LayoutBase {
  async fn fetch(&self, _ctx: &CancellationToken, base: &str) -> Result<Artifact, BuildError> {
    let layout = self.layout.clone();
    let name = base.to_string();
    debug!(base, root = %layout.root().display(), "loading base from layout");
    tokio::task::spawn_blocking(move || layout.load(&name))
      .await
      .map_err(|e| BuildError::Base {
        base: base.to_string(),
        message: e.to_string(),
      })?
      .map_err(|e| BuildError::Base {
        base: base.to_string(),
        message: e.to_string(),
      })
  }
}

/// Pulls bases through a registry client, as `repo:tag` or `repo@digest`.
pub struct RegistryBase {
  client: Arc<dyn RegistryClient>,
}

impl RegistryBase {
  pub fn new(client: Arc<dyn RegistryClient>) -> Self {
    Self { client }
  }
}

#[async_trait]
impl BaseSource for RegistryBase {
  async fn fetch(&self, ctx: &CancellationToken, base: &str) -> Result<Artifact, BuildError> {
    debug!(base, "pulling base from registry");
    self.client.pull(ctx, base).await.map_err(|e| BuildError::Base {
      base: base.to_string(),
      message: e.to_string(),
    })
  }
}

/// A fixed, in-memory set of bases.
#[derive(Debug, Clone, Default)]
pub struct StaticBase {
  images: BTreeMap<String, Artifact>,
}

impl StaticBase {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: &str, artifact: impl Into<Artifact>) -> Self {
    self.images.insert(name.to_string(), artifact.into());
    self
  }
}

#[async_trait]
impl BaseSource for StaticBase {
  async fn fetch(&self, _ctx: &CancellationToken, base: &str) -> Result<Artifact, BuildError> {
    self.images.get(base).cloned().ok_or_else(|| BuildError::Base {
      base: base.to_string(),
      message: "not found".to_string(),
    })
  }
}
