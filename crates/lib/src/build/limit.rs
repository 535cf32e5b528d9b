//! Bounding the number of simultaneous builds.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{BuildError, Builder};
use crate::image::Artifact;
use crate::reference::Reference;

/// Wraps a builder so that at most `limit` builds run at once.
///
/// Waiters are not served in any particular order. Qualification and support
/// checks are cheap and pass straight through.
pub struct Limiter {
  inner: Arc<dyn Builder>,
  semaphore: Arc<Semaphore>,
  limit: usize,
}

impl Limiter {
  /// `limit` of zero is treated as one.
  pub fn new(inner: Arc<dyn Builder>, limit: usize) -> Self {
    let limit = limit.max(1);
    Self {
      inner,
      semaphore: Arc::new(Semaphore::new(limit)),
      limit,
    }
  }

  /// Limit to the host's available parallelism.
  pub fn with_default_limit(inner: Arc<dyn Builder>) -> Self {
    Self::new(inner, default_parallelism())
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

/// Get the number of CPUs for default parallelism.
pub fn default_parallelism() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[async_trait]
impl Builder for Limiter {
  fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError> {
    self.inner.qualify_import(reference)
  }

  fn is_supported_reference(&self, reference: &Reference) -> Result<(), BuildError> {
    self.inner.is_supported_reference(reference)
  }

  async fn build(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError> {
    let _permit = tokio::select! {
      permit = self.semaphore.acquire() => permit.map_err(|_| BuildError::Cancelled)?,
      _ = ctx.cancelled() => return Err(BuildError::Cancelled),
    };
    trace!(reference = %reference, available = self.semaphore.available_permits(), "acquired build slot");
    self.inner.build(ctx, reference).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use super::*;
  use crate::image::Image;
  use crate::platform::Platform;

  struct SlowBuilder {
    running: AtomicUsize,
    peak: AtomicUsize,
    fail: bool,
  }

  #[async_trait]
  impl Builder for SlowBuilder {
    fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError> {
      Ok(reference.to_strict())
    }

    fn is_supported_reference(&self, _reference: &Reference) -> Result<(), BuildError> {
      Ok(())
    }

    async fn build(&self, _ctx: &CancellationToken, _reference: &Reference) -> Result<Artifact, BuildError> {
      let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      self.running.fetch_sub(1, Ordering::SeqCst);
      if self.fail {
        return Err(BuildError::Config("boom".into()));
      }
      Ok(Image::scratch(&Platform::default_target()).into())
    }
  }

  fn slow(fail: bool) -> Arc<SlowBuilder> {
    Arc::new(SlowBuilder {
      running: AtomicUsize::new(0),
      peak: AtomicUsize::new(0),
      fail,
    })
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn never_exceeds_limit() {
    let inner = slow(false);
    let limiter = Arc::new(Limiter::new(inner.clone(), 2));
    let mut set = tokio::task::JoinSet::new();
    for i in 0..8 {
      let limiter = limiter.clone();
      set.spawn(async move {
        let r = Reference::parse(&format!("example.com/app/{i}"));
        limiter.build(&CancellationToken::new(), &r).await
      });
    }
    while let Some(result) = set.join_next().await {
      result.unwrap().unwrap();
    }
    assert_eq!(inner.peak.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn permit_released_on_failure() {
    let limiter = Limiter::new(slow(true), 1);
    let r = Reference::parse("example.com/app");
    let ctx = CancellationToken::new();
    assert!(limiter.build(&ctx, &r).await.is_err());
    assert!(limiter.build(&ctx, &r).await.is_err());
    assert_eq!(limiter.semaphore.available_permits(), 1);
  }

  #[tokio::test]
  async fn cancelled_while_waiting() {
    let limiter = Limiter::new(slow(false), 1);
    let _held = limiter.semaphore.acquire().await.unwrap();
    let ctx = CancellationToken::new();
    ctx.cancel();
    let err = limiter.build(&ctx, &Reference::parse("x")).await.unwrap_err();
    assert!(matches!(err, BuildError::Cancelled));
  }

  #[test]
  fn zero_limit_is_one() {
    assert_eq!(Limiter::new(slow(false), 0).limit(), 1);
  }
}
