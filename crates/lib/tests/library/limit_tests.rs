use std::sync::Arc;
use std::time::{Duration, Instant};

use kopack_lib::build::{Builder, Limiter};
use kopack_lib::reference::Reference;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::common::ScriptedBuilder;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bound_of_two_throttles_without_serializing() {
  let mut scripted = ScriptedBuilder::new();
  for i in 0..10 {
    scripted = scripted.delay(&format!("example.com/app{i}"), 50);
  }
  let builder = Arc::new(scripted);
  let limiter = Arc::new(Limiter::new(builder.clone(), 2));
  let ctx = CancellationToken::new();

  let started = Instant::now();
  let mut set = JoinSet::new();
  for i in 0..10 {
    let limiter = limiter.clone();
    let ctx = ctx.clone();
    set.spawn(async move { limiter.build(&ctx, &Reference::parse(&format!("example.com/app{i}"))).await });
  }
  while let Some(joined) = set.join_next().await {
    joined.unwrap().unwrap();
  }
  let elapsed = started.elapsed();

  assert!(elapsed >= Duration::from_millis(250), "finished too fast: {:?}", elapsed);
  assert_eq!(builder.peak(), 2, "builds were not run two at a time");
  assert_eq!(builder.total(), 10);
}
