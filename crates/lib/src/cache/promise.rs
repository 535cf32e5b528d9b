//! Single-execution, multi-waiter memo cells.
//!
//! A [`Promise`] starts its computation immediately on the runtime and runs it
//! exactly once. Any number of clones may `get` it, before or after it
//! completes, and every one observes a clone of the same terminal result.
//! Errors are memoized just like values.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

/// The computation ended (e.g. panicked) without producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("computation ended without producing a result")]
pub struct Abandoned;

/// Handle on a memoized computation.
pub struct Promise<T, E> {
  rx: watch::Receiver<Option<Result<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
  fn clone(&self) -> Self {
    Self { rx: self.rx.clone() }
  }
}

impl<T, E> std::fmt::Debug for Promise<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Promise")
      .field("done", &self.rx.borrow().is_some())
      .finish()
  }
}

impl<T, E> Promise<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + From<Abandoned> + 'static,
{
  /// Start `fut` on the runtime.
  pub fn spawn<F>(fut: F) -> Self
  where
    F: Future<Output = Result<T, E>> + Send + 'static,
  {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
      let result = fut.await;
      tx.send_replace(Some(result));
    });
    Self { rx }
  }

  /// A promise that is already complete.
  pub fn ready(result: Result<T, E>) -> Self {
    let (_tx, rx) = watch::channel(Some(result));
    Self { rx }
  }

  /// Wait for the result.
  pub async fn get(&self) -> Result<T, E> {
    let mut rx = self.rx.clone();
    match rx.wait_for(Option::is_some).await {
      Ok(value) => match &*value {
        Some(result) => result.clone(),
        None => Err(E::from(Abandoned)),
      },
      Err(_) => Err(E::from(Abandoned)),
    }
  }

  pub fn is_done(&self) -> bool {
    self.rx.borrow().is_some()
  }

  /// Whether the completed result is an error. `false` while pending.
  pub fn is_failed(&self) -> bool {
    matches!(&*self.rx.borrow(), Some(Err(_)))
  }

  /// The result if already complete, without waiting.
  pub fn peek(&self) -> Option<Result<T, E>> {
    self.rx.borrow().clone()
  }
}

/// A keyed set of promises with explicit invalidation.
///
/// Lookup and insertion happen under one lock, so concurrent callers for the
/// same key always share a single computation.
pub struct PromiseMap<K, T, E> {
  entries: Mutex<HashMap<K, Promise<T, E>>>,
}

impl<K, T, E> Default for PromiseMap<K, T, E> {
  fn default() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }
}

impl<K, T, E> PromiseMap<K, T, E>
where
  K: Eq + Hash,
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + From<Abandoned> + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the promise for `key`, spawning `make()` if there is none.
  pub fn get_or_spawn<F, Fut>(&self, key: K, make: F) -> Promise<T, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.get_or_replace(key, |_| false, || Promise::spawn(make()))
  }

  /// Return the existing promise for `key` unless `stale` says it must be
  /// replaced, in which case `make()` provides the new one.
  pub fn get_or_replace<S, F>(&self, key: K, stale: S, make: F) -> Promise<T, E>
  where
    S: FnOnce(&Promise<T, E>) -> bool,
    F: FnOnce() -> Promise<T, E>,
  {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = entries.get(&key)
      && !stale(existing)
    {
      return existing.clone();
    }
    let promise = make();
    entries.insert(key, promise.clone());
    promise
  }

  pub fn get(&self, key: &K) -> Option<Promise<T, E>> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.get(key).cloned()
  }

  /// Drop the entry for `key`. Returns whether one existed.
  pub fn invalidate(&self, key: &K) -> bool {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.remove(key).is_some()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
