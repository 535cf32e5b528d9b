use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kopack_lib::cache::{BuildCache, PublishCache};
use kopack_lib::resolve::{FileResolver, Mode, ResolveError, ResolveOptions, resolve_documents};
use serde_yaml::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::common::{BasePublisher, ScriptedBuilder, documents, labelled};

fn strict() -> ResolveOptions {
  ResolveOptions {
    strict: true,
    selector: None,
  }
}

#[tokio::test]
async fn list_of_references_resolves_to_base_paths() {
  let builder = Arc::new(ScriptedBuilder::new());
  let publisher = Arc::new(BasePublisher::new("base"));
  let docs = documents("[\"ko://a\", \"ko://b\"]\n");

  let out = resolve_documents(&CancellationToken::new(), docs, builder, publisher, &strict())
    .await
    .unwrap();

  let hash_a = labelled("a", 1).digest().unwrap();
  let hash_b = labelled("b", 1).digest().unwrap();
  let expected: Value = serde_yaml::from_str(&format!("[\"base/a@{}\", \"base/b@{}\"]", hash_a, hash_b)).unwrap();
  assert_eq!(out, vec![expected]);
}

#[tokio::test]
async fn repeated_reference_gets_identical_string() {
  let builder = Arc::new(ScriptedBuilder::new());
  let docs = documents("first: ko://example.com/app\nnested:\n  again: ko://example.com/app\n");
  let out = resolve_documents(
    &CancellationToken::new(),
    docs,
    builder.clone(),
    Arc::new(BasePublisher::new("registry.example")),
    &strict(),
  )
  .await
  .unwrap();
  assert_eq!(out[0]["first"], out[0]["nested"]["again"]);
  assert_eq!(builder.builds_of("example.com/app"), 1);
}

#[tokio::test]
async fn strict_mode_rejects_unsupported_references_without_building() {
  let builder = Arc::new(ScriptedBuilder::new());
  let docs = documents("a: ko://example.com/ok\n---\nb: ko://unsupported/thing\n");
  let err = resolve_documents(
    &CancellationToken::new(),
    docs,
    builder.clone(),
    Arc::new(BasePublisher::new("registry.example")),
    &strict(),
  )
  .await
  .unwrap_err();
  assert!(matches!(err, ResolveError::Unsupported { .. }));
  assert_eq!(builder.total(), 0);
}

#[tokio::test]
async fn files_are_emitted_in_submission_order() {
  let temp = TempDir::new().unwrap();
  let names = ["f1", "f2", "f3"];
  let files: Vec<PathBuf> = names
    .iter()
    .map(|name| {
      let path = temp.path().join(format!("{name}.yaml"));
      std::fs::write(&path, format!("file: {name}\nimage: ko://example.com/{name}\n")).unwrap();
      path
    })
    .collect();

  // f2 finishes first, then f1, then f3
  let builder = ScriptedBuilder::new()
    .delay("example.com/f1", 60)
    .delay("example.com/f2", 10)
    .delay("example.com/f3", 120);
  let builds = Arc::new(BuildCache::new(Arc::new(builder)));
  let publishes = Arc::new(PublishCache::new(Arc::new(BasePublisher::new("registry.example"))));
  let resolver = FileResolver::new(builds, publishes, strict());

  let (tx, rx) = mpsc::channel(4);
  for file in &files {
    tx.send(file.clone()).await.unwrap();
  }
  drop(tx);

  let mut out = Vec::new();
  resolver
    .run(&CancellationToken::new(), rx, &mut out, Mode::FailFast)
    .await
    .unwrap();

  let text = String::from_utf8(out).unwrap();
  let emitted: Vec<&str> = text.lines().filter_map(|l| l.strip_prefix("file: ")).collect();
  assert_eq!(emitted, names);
  let docs = documents(&text);
  assert_eq!(docs.len(), 3);
  for doc in &docs {
    assert!(doc["image"].as_str().unwrap().starts_with("registry.example/example.com/f"));
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fail_fast_stream_leaves_nothing_running() {
  let temp = TempDir::new().unwrap();
  let bad = temp.path().join("bad.yaml");
  let slow = temp.path().join("slow.yaml");
  std::fs::write(&bad, "image: ko://example.com/bad\n").unwrap();
  std::fs::write(&slow, "image: ko://example.com/slow\n").unwrap();

  let builder = ScriptedBuilder::new()
    .delay("example.com/bad", 20)
    .fail("example.com/bad")
    .delay("example.com/slow", 100);
  let builds = Arc::new(BuildCache::new(Arc::new(builder)));
  let publisher = Arc::new(BasePublisher::new("registry.example"));
  let publishes = Arc::new(PublishCache::new(publisher.clone()));
  let resolver = FileResolver::new(builds, publishes, strict());

  let (tx, rx) = mpsc::channel(4);
  tx.send(bad).await.unwrap();
  tx.send(slow).await.unwrap();
  drop(tx);

  let mut out = Vec::new();
  let err = resolver
    .run(&CancellationToken::new(), rx, &mut out, Mode::FailFast)
    .await
    .unwrap_err();
  assert!(matches!(err, ResolveError::Build { .. }));
  assert!(out.is_empty());

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert!(publisher.published().is_empty(), "published after return: {:?}", publisher.published());
}
