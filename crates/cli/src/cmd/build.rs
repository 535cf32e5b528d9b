//! Implementation of the `kopack build` command.
//!
//! Builds each import path into an image, publishes it, and prints the
//! published references to stdout in argument order.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kopack_lib::build::Builder;
use kopack_lib::cache::{BuildCache, PublishCache};
use kopack_lib::publish::Publisher;
use kopack_lib::reference::Reference;

use super::{BuildOptions, PublishOptions, interrupt_token, make_builder, make_publisher};
use crate::output::{format_elapsed, print_mapping, print_success, truncate_digest};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Import paths to build, e.g. ./cmd/server or ko://example.com/app
  #[arg(required = true)]
  pub import_paths: Vec<String>,

  #[command(flatten)]
  pub build: BuildOptions,

  #[command(flatten)]
  pub publish: PublishOptions,
}

/// Execute the build command.
pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let published = rt.block_on(async {
    let builds = make_builder(&args.build)?;
    let publishes = make_publisher(&args.publish)?;
    let ctx = interrupt_token();

    let result = build_all(&ctx, &builds, &publishes, &args.import_paths).await;
    publishes.close().context("Failed to finalize destination")?;
    result
  })?;

  for (import_path, reference) in args.import_paths.iter().zip(&published) {
    let short = reference
      .rsplit_once('@')
      .map_or(reference.as_str(), |(_, digest)| truncate_digest(digest));
    print_mapping(import_path, short);
    println!("{}", reference);
  }
  print_success(&format!(
    "Published {} image(s) in {}",
    published.len(),
    format_elapsed(started.elapsed())
  ));
  Ok(())
}

async fn build_all(
  ctx: &CancellationToken,
  builds: &Arc<BuildCache>,
  publishes: &Arc<PublishCache>,
  import_paths: &[String],
) -> Result<Vec<String>> {
  let mut references = Vec::with_capacity(import_paths.len());
  for import_path in import_paths {
    let reference = Reference::parse(import_path);
    builds
      .is_supported_reference(&reference)
      .with_context(|| format!("Cannot build {}", import_path))?;
    references.push(builds.qualify_import(&reference)?);
  }

  let batch = ctx.child_token();
  let mut join_set = JoinSet::new();
  for (index, reference) in references.into_iter().enumerate() {
    let builds = builds.clone();
    let publishes = publishes.clone();
    let batch = batch.clone();
    join_set.spawn(async move {
      let result = build_one(&batch, &builds, &publishes, &reference).await;
      if result.is_err() {
        batch.cancel();
      }
      (index, reference, result)
    });
  }

  let mut published = vec![String::new(); import_paths.len()];
  let mut first_error = None;
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((index, reference, Ok(name))) => {
        info!(reference = %reference, published = %name, "published");
        published[index] = name;
      }
      Ok((_, reference, Err(e))) => {
        error!(reference = %reference, error = %e, "build failed");
        first_error.get_or_insert(e);
      }
      Err(e) => {
        error!(error = %e, "build task panicked");
        first_error.get_or_insert(anyhow!("build task panicked: {}", e));
      }
    }
  }

  match first_error {
    Some(e) => Err(e),
    None => Ok(published),
  }
}

async fn build_one(
  ctx: &CancellationToken,
  builds: &BuildCache,
  publishes: &PublishCache,
  reference: &Reference,
) -> Result<String> {
  let artifact = builds
    .build(ctx, reference)
    .await
    .with_context(|| format!("Failed to build {}", reference))?;
  let name = publishes
    .get(ctx, &artifact, reference)?
    .get()
    .await
    .with_context(|| format!("Failed to publish {}", reference))?;
  Ok(name)
}
