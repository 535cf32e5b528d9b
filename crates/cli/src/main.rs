//! kopack - build Go programs into container images and resolve image
//! references in YAML.

mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, ResolveArgs, cmd_build, cmd_resolve};
use output::print_error;

/// kopack - build Go import paths into container images
#[derive(Parser)]
#[command(name = "kopack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build and publish images for import paths
  Build(BuildArgs),

  /// Build and publish every image referenced by YAML files, printing the
  /// rewritten documents
  Resolve(ResolveArgs),
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli.command) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(command: Commands) -> Result<()> {
  match command {
    Commands::Build(args) => cmd_build(args),
    Commands::Resolve(args) => cmd_resolve(args),
  }
}
