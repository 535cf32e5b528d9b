//! Memoized builds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::promise::{Promise, PromiseMap};
use crate::build::{BuildError, Builder};
use crate::image::Artifact;
use crate::reference::Reference;

/// Wraps a builder so each canonical reference is built at most once until
/// invalidated.
///
/// A build that was cancelled is not kept: the next request starts over, and
/// waiters whose own token is still live restart it themselves.
pub struct BuildCache {
  inner: Arc<dyn Builder>,
  builds: PromiseMap<String, Artifact, BuildError>,
  supported: Mutex<HashMap<String, Result<(), BuildError>>>,
}

impl BuildCache {
  pub fn new(inner: Arc<dyn Builder>) -> Self {
    Self {
      inner,
      builds: PromiseMap::new(),
      supported: Mutex::new(HashMap::new()),
    }
  }

  /// Canonical form of `reference`, or the reference itself when the builder
  /// cannot qualify it.
  fn canonical(&self, reference: &Reference) -> Reference {
    self.inner.qualify_import(reference).unwrap_or_else(|_| reference.clone())
  }

  /// The promise for `reference`, starting its build if needed.
  pub fn get(&self, ctx: &CancellationToken, reference: &Reference) -> Promise<Artifact, BuildError> {
    let canonical = self.canonical(reference);
    let key = canonical.to_string();
    self.builds.get_or_replace(
      key.clone(),
      |existing| matches!(existing.peek(), Some(Err(BuildError::Cancelled))),
      || {
        debug!(reference = %key, "starting build");
        let inner = self.inner.clone();
        let ctx = ctx.clone();
        Promise::spawn(async move { inner.build(&ctx, &canonical).await })
      },
    )
  }

  /// Forget the build and support check for `reference`. Returns whether a
  /// build was cached.
  pub fn invalidate(&self, reference: &Reference) -> bool {
    let key = self.canonical(reference).to_string();
    self
      .supported
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&key);
    let removed = self.builds.invalidate(&key);
    debug!(reference = %key, removed, "invalidated build");
    removed
  }

  pub fn len(&self) -> usize {
    self.builds.len()
  }

  pub fn is_empty(&self) -> bool {
    self.builds.is_empty()
  }
}

#[async_trait]
impl Builder for BuildCache {
  fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError> {
    self.inner.qualify_import(reference)
  }

  fn is_supported_reference(&self, reference: &Reference) -> Result<(), BuildError> {
    let key = self.canonical(reference).to_string();
    if let Some(result) = self
      .supported
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&key)
    {
      return result.clone();
    }
    let result = self.inner.is_supported_reference(reference);
    self
      .supported
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key, result.clone());
    result
  }

  /// Wait for the shared build of `reference`.
  ///
  /// The shared build runs under the token of whichever caller started it.
  /// If that caller's batch is cancelled while `ctx` is still live, the
  /// cancelled entry is replaced and the build restarts under `ctx`.
  async fn build(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError> {
    loop {
      let promise = self.get(ctx, reference);
      let result = tokio::select! {
        _ = ctx.cancelled() => return Err(BuildError::Cancelled),
        result = promise.get() => result,
      };
      match result {
        Err(BuildError::Cancelled) if !ctx.is_cancelled() => {
          debug!(reference = %reference, "shared build was cancelled elsewhere, restarting");
        }
        other => return other,
      }
    }
  }
}
