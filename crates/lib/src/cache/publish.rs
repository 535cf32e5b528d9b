//! Memoized publishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::promise::{Promise, PromiseMap};
use crate::image::Artifact;
use crate::publish::{PublishError, Publisher};
use crate::reference::Reference;
use crate::util::hash::Digest;

/// Wraps a publisher so each reference is published once per artifact.
///
/// An entry is reused only while the artifact digest it was created for
/// matches; a rebuilt artifact replaces it.
pub struct PublishCache {
  inner: Arc<dyn Publisher>,
  // lock order: digests before entries
  digests: Mutex<HashMap<String, Digest>>,
  entries: PromiseMap<String, String, PublishError>,
}

impl PublishCache {
  pub fn new(inner: Arc<dyn Publisher>) -> Self {
    Self {
      inner,
      digests: Mutex::new(HashMap::new()),
      entries: PromiseMap::new(),
    }
  }

  /// The promise publishing `artifact` for `reference`.
  pub fn get(
    &self,
    ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<Promise<String, PublishError>, PublishError> {
    let digest = artifact.digest()?;
    let key = reference.to_string();

    let mut digests = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
    let changed = digests.get(&key) != Some(&digest);
    let promise = self.entries.get_or_replace(
      key.clone(),
      |existing| changed || matches!(existing.peek(), Some(Err(PublishError::Cancelled))),
      || {
        debug!(reference = %key, digest = %digest, "starting publish");
        let inner = self.inner.clone();
        let ctx = ctx.clone();
        let artifact = artifact.clone();
        let reference = reference.clone();
        Promise::spawn(async move { inner.publish(&ctx, &artifact, &reference).await })
      },
    );
    digests.insert(key, digest);
    Ok(promise)
  }

  /// Forget the publish for `reference`. Returns whether one was cached.
  pub fn invalidate(&self, reference: &Reference) -> bool {
    let key = reference.to_string();
    let mut digests = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
    digests.remove(&key);
    self.entries.invalidate(&key)
  }
}

#[async_trait]
impl Publisher for PublishCache {
  async fn publish(
    &self,
    ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    self.get(ctx, artifact, reference)?.get().await
  }

  fn close(&self) -> Result<(), PublishError> {
    self.inner.close()
  }
}
