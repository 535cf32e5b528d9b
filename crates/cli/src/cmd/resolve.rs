//! Implementation of the `kopack resolve` command.
//!
//! Reads YAML files, builds and publishes every image reference they contain,
//! and writes the rewritten documents to stdout in input order.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use kopack_lib::publish::Publisher;
use kopack_lib::resolve::stream::STDIN_PATH;
use kopack_lib::resolve::{DependencyGraph, FileResolver, Mode, ResolveOptions, Selector, enumerate_inputs, watch};

use super::{BuildOptions, PublishOptions, interrupt_token, make_builder, make_publisher};
use crate::output::{format_elapsed, print_info, print_success, print_warning};

#[derive(Debug, Args)]
pub struct ResolveArgs {
  /// Files or directories to resolve ("-" reads stdin)
  #[arg(short, long = "filename", required = true)]
  pub filenames: Vec<PathBuf>,

  /// Descend into subdirectories of directory arguments
  #[arg(short = 'R', long)]
  pub recursive: bool,

  /// Only treat ko:// strings as references, and fail on any that cannot be built
  #[arg(long)]
  pub strict: bool,

  /// Only resolve documents whose labels match, e.g. app=web,tier!=db
  #[arg(short = 'l', long)]
  pub selector: Option<Selector>,

  /// Keep running and re-resolve files whose images change. Changed import
  /// paths are read from stdin, whitespace separated, one batch per line.
  #[arg(short, long)]
  pub watch: bool,

  #[command(flatten)]
  pub build: BuildOptions,

  #[command(flatten)]
  pub publish: PublishOptions,
}

/// Execute the resolve command.
pub fn cmd_resolve(args: ResolveArgs) -> Result<()> {
  let started = Instant::now();
  let files = enumerate_inputs(&args.filenames, args.recursive).context("Failed to list input files")?;
  if files.is_empty() {
    bail!("No YAML or JSON files found in the given paths");
  }
  let reads_stdin = files.iter().any(|f| f.as_os_str() == STDIN_PATH);
  if args.watch && reads_stdin {
    bail!("--watch reads change notifications from stdin and cannot be combined with -f -");
  }
  debug!(files = files.len(), "resolving inputs");

  let options = ResolveOptions {
    strict: args.strict,
    selector: args.selector.clone(),
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    let builds = make_builder(&args.build)?;
    let publishes = make_publisher(&args.publish)?;
    let ctx = interrupt_token();
    let resolver = FileResolver::new(builds.clone(), publishes.clone(), options);

    let result = if args.watch {
      print_warning("Watching: write changed import paths to stdin, Ctrl-D to stop");
      let (tx, rx) = mpsc::channel(16);
      tokio::spawn(read_notifications(tx));
      let graph = std::sync::Arc::new(DependencyGraph::new());
      watch(resolver, builds, graph, &ctx, files.clone(), rx, tokio::io::stdout())
        .await
        .context("Watch failed")
    } else {
      let (tx, rx) = mpsc::channel(files.len());
      for file in &files {
        tx.send(file.clone()).await.context("Resolver stopped accepting files")?;
      }
      drop(tx);
      let mut stdout = tokio::io::stdout();
      resolver
        .run(&ctx, rx, &mut stdout, Mode::FailFast)
        .await
        .context("Failed to resolve")
    };

    publishes.close().context("Failed to finalize destination")?;
    result
  })?;

  if args.watch {
    print_info("Stopped watching");
  } else {
    print_success(&format!(
      "Resolved {} file(s) in {}",
      files.len(),
      format_elapsed(started.elapsed())
    ));
  }
  Ok(())
}

/// Forward each non-empty stdin line as one notification batch.
async fn read_notifications(tx: mpsc::Sender<HashSet<String>>) {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    let changed: HashSet<String> = line.split_whitespace().map(str::to_string).collect();
    if changed.is_empty() {
      continue;
    }
    info!(changed = changed.len(), "change notification");
    if tx.send(changed).await.is_err() {
      break;
    }
  }
}
