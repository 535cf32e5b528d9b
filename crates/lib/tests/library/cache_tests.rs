use std::sync::Arc;
use std::time::{Duration, Instant};

use kopack_lib::build::{BuildError, Builder};
use kopack_lib::cache::{BuildCache, PublishCache};
use kopack_lib::publish::Publisher;
use kopack_lib::reference::Reference;
use kopack_lib::resolve::{ResolveError, ResolveOptions, resolve_documents};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::common::{BasePublisher, ScriptedBuilder, documents};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_observe_one_outcome() {
  let builder = Arc::new(ScriptedBuilder::new().delay("example.com/a", 50));
  let cache = Arc::new(BuildCache::new(builder.clone()));
  let ctx = CancellationToken::new();

  let mut set = JoinSet::new();
  for _ in 0..16 {
    let cache = cache.clone();
    let ctx = ctx.clone();
    set.spawn(async move {
      cache
        .build(&ctx, &Reference::parse("ko://example.com/a"))
        .await
        .unwrap()
        .digest()
        .unwrap()
    });
  }

  let mut digests = Vec::new();
  while let Some(joined) = set.join_next().await {
    digests.push(joined.unwrap());
  }
  assert!(digests.windows(2).all(|w| w[0] == w[1]));
  assert_eq!(builder.builds_of("example.com/a"), 1);
}

#[tokio::test]
async fn different_keys_get_different_artifacts() {
  let builder = Arc::new(ScriptedBuilder::new());
  let cache = BuildCache::new(builder);
  let ctx = CancellationToken::new();
  let a = cache.build(&ctx, &Reference::parse("ko://example.com/a")).await.unwrap();
  let b = cache.build(&ctx, &Reference::parse("ko://example.com/b")).await.unwrap();
  assert_ne!(a.digest().unwrap(), b.digest().unwrap());
}

#[tokio::test]
async fn invalidation_reruns_the_build() {
  let builder = Arc::new(ScriptedBuilder::new().delay("example.com/a", 60));
  let cache = BuildCache::new(builder.clone());
  let ctx = CancellationToken::new();
  let reference = Reference::parse("ko://example.com/a");

  let first = cache.build(&ctx, &reference).await.unwrap();

  let started = Instant::now();
  let hit = cache.build(&ctx, &reference).await.unwrap();
  assert!(started.elapsed() < Duration::from_millis(50));
  assert_eq!(hit.digest().unwrap(), first.digest().unwrap());

  cache.invalidate(&reference);
  let started = Instant::now();
  let fresh = cache.build(&ctx, &reference).await.unwrap();
  assert!(started.elapsed() >= Duration::from_millis(60));
  assert_ne!(fresh.digest().unwrap(), first.digest().unwrap());
  assert_eq!(builder.builds_of("example.com/a"), 2);
}

#[tokio::test]
async fn rebuilt_artifacts_are_republished() {
  let builder = Arc::new(ScriptedBuilder::new());
  let builds = BuildCache::new(builder);
  let publishes = PublishCache::new(Arc::new(BasePublisher::new("registry.example")));
  let ctx = CancellationToken::new();
  let reference = Reference::parse("ko://example.com/a");

  let artifact = builds.build(&ctx, &reference).await.unwrap();
  let first = publishes.publish(&ctx, &artifact, &reference).await.unwrap();
  assert_eq!(publishes.publish(&ctx, &artifact, &reference).await.unwrap(), first);

  builds.invalidate(&reference);
  let rebuilt = builds.build(&ctx, &reference).await.unwrap();
  let second = publishes.publish(&ctx, &rebuilt, &reference).await.unwrap();
  assert_ne!(first, second);
  assert!(second.ends_with(rebuilt.digest().unwrap().as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_batch_leaves_sibling_batch_intact() {
  let builder = Arc::new(
    ScriptedBuilder::new()
      .delay("example.com/bad", 30)
      .fail("example.com/bad")
      .delay("example.com/slow", 150),
  );
  let builds = Arc::new(BuildCache::new(builder.clone()));
  let publisher = Arc::new(BasePublisher::new("registry.example"));
  let options = ResolveOptions {
    strict: true,
    selector: None,
  };

  let failing = {
    let builds = builds.clone();
    let publisher = publisher.clone();
    let options = options.clone();
    tokio::spawn(async move {
      let docs = documents("bad: ko://example.com/bad\nslow: ko://example.com/slow\n");
      resolve_documents(&CancellationToken::new(), docs, builds, publisher, &options).await
    })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;

  let docs = documents("slow: ko://example.com/slow\n");
  let healthy = resolve_documents(&CancellationToken::new(), docs, builds, publisher, &options)
    .await
    .unwrap();

  let err = failing.await.unwrap().unwrap_err();
  assert!(matches!(
    err,
    ResolveError::Build {
      source: BuildError::Toolchain { .. },
      ..
    }
  ));
  assert!(
    healthy[0]["slow"]
      .as_str()
      .unwrap()
      .starts_with("registry.example/example.com/slow@")
  );
  // the shared build died with the failing batch and was started again
  assert_eq!(builder.builds_of("example.com/slow"), 2);
}
