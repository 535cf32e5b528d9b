//! Subcommands and the setup they share.

mod build;
mod resolve;

pub use build::{BuildArgs, cmd_build};
pub use resolve::{ResolveArgs, cmd_resolve};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kopack_lib::build::limit::default_parallelism;
use kopack_lib::build::{BaseSource, GoBuilder, GoToolchain, GoVersionSbom, LayoutBase, Limiter, SbomGenerator, StaticBase};
use kopack_lib::cache::{BuildCache, PublishCache};
use kopack_lib::config::{ProjectConfig, docker_repo};
use kopack_lib::platform::paths::cache_dir;
use kopack_lib::publish::{DaemonPublisher, Destination, LayoutPublisher, Namer, TarballPublisher};

/// Options controlling how images are built.
#[derive(Debug, Args)]
pub struct BuildOptions {
  /// Platforms to build for, e.g. linux/amd64,linux/arm64 or "all"
  #[arg(long, value_delimiter = ',')]
  pub platform: Vec<String>,

  /// Maximum number of concurrent builds (default: available CPUs)
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// OCI layout directory holding base images, looked up by tag
  #[arg(long)]
  pub base_layout: Option<PathBuf>,

  /// Attach a `go version -m` SBOM to each image
  #[arg(long)]
  pub sbom: bool,

  /// Keep compiled binaries in the user cache directory ($KOPACK_CACHE wins)
  #[arg(long)]
  pub keep_binaries: bool,

  /// Directory containing the Go module (default: current directory)
  #[arg(short = 'C', long)]
  pub working_dir: Option<PathBuf>,
}

/// Options controlling where images are published.
#[derive(Debug, Args)]
pub struct PublishOptions {
  /// Repository images are named under (default: $KOPACK_DOCKER_REPO)
  #[arg(long)]
  pub repo: Option<String>,

  /// Naming strategy: default, preserve-import-paths, base-import-paths, bare
  #[arg(long, default_value = "default")]
  pub naming: Namer,

  /// Tags applied to every image (default: latest)
  #[arg(short, long, value_delimiter = ',')]
  pub tags: Vec<String>,

  /// Write images into this OCI layout directory
  #[arg(long)]
  pub oci_layout_path: Option<PathBuf>,

  /// Write images into this docker-save tarball
  #[arg(long)]
  pub tarball: Option<PathBuf>,

  /// Load images into the local docker daemon
  #[arg(short = 'L', long)]
  pub local: bool,
}

/// Build a cached, concurrency-limited builder from the project configuration.
pub fn make_builder(options: &BuildOptions) -> Result<Arc<BuildCache>> {
  let working_dir = match &options.working_dir {
    Some(dir) => dir.clone(),
    None => std::env::current_dir().context("Failed to determine the current directory")?,
  };

  let project = ProjectConfig::load(&working_dir).context("Failed to load project configuration")?;
  let mut config = project
    .into_builder_config(&working_dir)
    .context("Invalid project configuration")?;
  if !options.platform.is_empty() {
    config.platforms = options.platform.clone();
  }
  if options.keep_binaries && config.cache_dir.is_none() {
    config.cache_dir = Some(cache_dir().join("bin"));
  }

  let bases: Arc<dyn BaseSource> = match &options.base_layout {
    Some(root) => Arc::new(LayoutBase::new(root)),
    None => Arc::new(StaticBase::new()),
  };
  let sbom = options
    .sbom
    .then(|| Arc::new(GoVersionSbom::default()) as Arc<dyn SbomGenerator>);

  let go = GoBuilder::new(config, Arc::new(GoToolchain::default()), bases, sbom)
    .with_context(|| format!("Failed to set up the builder in {}", working_dir.display()))?;
  debug!(module = %go.module().path, "builder ready");

  let jobs = options.jobs.unwrap_or_else(default_parallelism);
  let limited = Limiter::new(Arc::new(go), jobs);
  Ok(Arc::new(BuildCache::new(Arc::new(limited))))
}

/// Assemble the destinations selected on the command line.
pub fn make_publisher(options: &PublishOptions) -> Result<Arc<PublishCache>> {
  let repo = options.repo.clone().or_else(docker_repo).unwrap_or_default();
  let mut destinations = Vec::new();

  if let Some(root) = &options.oci_layout_path {
    let layout = LayoutPublisher::new(root, options.naming, options.tags.clone())
      .with_context(|| format!("Failed to open OCI layout {}", root.display()))?;
    destinations.push(Destination::Layout(layout));
  }
  if let Some(path) = &options.tarball {
    destinations.push(Destination::Tarball(TarballPublisher::new(
      path,
      &repo,
      options.naming,
      options.tags.clone(),
    )));
  }
  if options.local {
    destinations.push(Destination::Daemon(DaemonPublisher::new(
      &repo,
      options.naming,
      options.tags.clone(),
    )));
  }

  let destination = match destinations.len() {
    0 => bail!("No destination selected: pass --oci-layout-path, --tarball or --local"),
    1 => destinations.remove(0),
    _ => Destination::Multi(destinations),
  };
  Ok(Arc::new(PublishCache::new(Arc::new(destination))))
}

/// A token cancelled on Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
  let token = CancellationToken::new();
  let cancel = token.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling");
      cancel.cancel();
    }
  });
  token
}
