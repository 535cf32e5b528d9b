//! Watch mode: re-resolving files when the references they use change.
//!
//! The [`DependencyGraph`] maps each resolved file to the canonical references
//! it contained. Entries only ever grow; a reference removed from a file keeps
//! triggering re-resolution of that file.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ResolveError;
use super::stream::{FileResolver, Mode};
use crate::build::Builder;
use crate::cache::BuildCache;
use crate::reference::Reference;

/// File to reference map used to decide what to re-resolve.
#[derive(Debug, Default)]
pub struct DependencyGraph {
  files: Mutex<BTreeMap<PathBuf, BTreeSet<Reference>>>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `references` to the set recorded for `file`.
  pub fn record(&self, file: &Path, references: impl IntoIterator<Item = Reference>) {
    let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = files.entry(file.to_path_buf()).or_default();
    entry.extend(references);
    debug!(file = %file.display(), references = entry.len(), "recorded dependencies");
  }

  /// Files whose recorded references intersect `changed`, with the
  /// intersecting references.
  pub fn affected(&self, changed: &BTreeSet<Reference>) -> Vec<(PathBuf, BTreeSet<Reference>)> {
    let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
    files
      .iter()
      .filter_map(|(file, references)| {
        let hit: BTreeSet<Reference> = references.intersection(changed).cloned().collect();
        (!hit.is_empty()).then(|| (file.clone(), hit))
      })
      .collect()
  }

  pub fn references_of(&self, file: &Path) -> BTreeSet<Reference> {
    let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
    files.get(file).cloned().unwrap_or_default()
  }
}

/// Resolve `files`, then re-resolve affected files on every change
/// notification until `notifications` closes or `ctx` is cancelled.
///
/// Notifications carry reference strings in any form; they are canonicalized
/// through `cache` before matching. Failures are logged, not returned.
pub async fn watch<W>(
  resolver: FileResolver,
  cache: Arc<BuildCache>,
  graph: Arc<DependencyGraph>,
  ctx: &CancellationToken,
  files: Vec<PathBuf>,
  mut notifications: mpsc::Receiver<HashSet<String>>,
  out: W,
) -> Result<(), ResolveError>
where
  W: AsyncWrite + Unpin + Send + 'static,
{
  let resolver = resolver.with_graph(graph.clone());
  let (tx, rx) = mpsc::channel(files.len().max(16));
  let run_ctx = ctx.clone();
  let runner = tokio::spawn(async move {
    let mut out = out;
    resolver.run(&run_ctx, rx, &mut out, Mode::Watch).await
  });

  for file in files {
    if tx.send(file).await.is_err() {
      break;
    }
  }

  loop {
    let changed = tokio::select! {
      _ = ctx.cancelled() => break,
      received = notifications.recv() => match received {
        Some(changed) => changed,
        None => break,
      },
    };

    let canonical: BTreeSet<Reference> = changed
      .iter()
      .map(|raw| {
        let reference = Reference::parse(raw);
        cache.qualify_import(&reference).unwrap_or(reference)
      })
      .collect();

    let affected = graph.affected(&canonical);
    if affected.is_empty() {
      debug!(changed = canonical.len(), "change affects no files");
      continue;
    }
    for (file, references) in affected {
      for reference in &references {
        cache.invalidate(reference);
      }
      info!(file = %file.display(), references = references.len(), "re-resolving");
      if tx.send(file).await.is_err() {
        warn!("resolver stopped accepting files");
        break;
      }
    }
  }

  drop(tx);
  match runner.await {
    Ok(Err(ResolveError::Cancelled)) if ctx.is_cancelled() => Ok(()),
    Ok(result) => result,
    Err(e) => Err(ResolveError::Task(e.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tokio::io::AsyncReadExt;

  use super::*;
  use crate::resolve::ResolveOptions;
  use crate::util::testutil::{FakeBuilder, RecordingPublisher};

  fn refs(raw: &[&str]) -> BTreeSet<Reference> {
    raw.iter().map(|r| Reference::parse(r)).collect()
  }

  #[test]
  fn graph_unions_and_intersects() {
    let graph = DependencyGraph::new();
    graph.record(Path::new("a.yaml"), refs(&["ko://x", "ko://y"]));
    graph.record(Path::new("b.yaml"), refs(&["ko://y"]));
    graph.record(Path::new("a.yaml"), refs(&["ko://z"]));

    assert_eq!(graph.references_of(Path::new("a.yaml")).len(), 3);

    let hit = graph.affected(&refs(&["ko://y"]));
    assert_eq!(hit.len(), 2);
    assert_eq!(hit[0], (PathBuf::from("a.yaml"), refs(&["ko://y"])));

    assert!(graph.affected(&refs(&["ko://nothing"])).is_empty());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn change_rebuilds_and_reemits_affected_files() {
    let temp = tempfile::TempDir::new().unwrap();
    let a = temp.path().join("a.yaml");
    let b = temp.path().join("b.yaml");
    std::fs::write(&a, "image: ko://example.com/a\n").unwrap();
    std::fs::write(&b, "image: ko://example.com/b\n").unwrap();

    let builder = Arc::new(FakeBuilder::new());
    let cache = Arc::new(BuildCache::new(builder.clone()));
    let graph = Arc::new(DependencyGraph::new());
    let resolver = FileResolver::new(
      cache.clone(),
      Arc::new(RecordingPublisher::new()),
      ResolveOptions {
        strict: true,
        selector: None,
      },
    );

    let (writer, mut reader) = tokio::io::duplex(1 << 16);
    let (notify, notifications) = mpsc::channel(4);
    let ctx = CancellationToken::new();

    let watcher = {
      let (cache, graph, ctx, files) = (cache.clone(), graph.clone(), ctx.clone(), vec![a.clone(), b.clone()]);
      tokio::spawn(async move { watch(resolver, cache, graph, &ctx, files, notifications, writer).await })
    };

    while graph.references_of(&b).is_empty() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    notify.send(HashSet::from(["example.com/a".to_string()])).await.unwrap();
    drop(notify);
    watcher.await.unwrap().unwrap();

    let mut text = String::new();
    reader.read_to_string(&mut text).await.unwrap();
    let images: Vec<&str> = text.lines().filter_map(|l| l.strip_prefix("image: ")).collect();
    assert_eq!(images.len(), 3);
    assert!(images[0].contains("example.com/a@"));
    assert!(images[2].contains("example.com/a@"));
    assert_ne!(images[0], images[2]);
    assert_eq!(builder.builds_of("example.com/a"), 2);
    assert_eq!(builder.builds_of("example.com/b"), 1);
  }
}
