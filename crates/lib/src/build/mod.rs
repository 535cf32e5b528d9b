//! Turning references into images.
//!
//! The [`Builder`] capability is the seam every layer of the pipeline shares:
//! the Go builder implements it, and the [`Limiter`] and the build cache wrap
//! any other builder while implementing it themselves.
//!
//! # Submodules
//!
//! - [`base`] - Base image sources
//! - [`config`] - Per-package build configuration
//! - [`gobuild`] - The Go image builder
//! - [`layer`] - Deterministic layer packaging
//! - [`limit`] - Concurrency limiting wrapper
//! - [`sbom`] - Optional SBOM generation
//! - [`toolchain`] - The `go build` invocation

pub mod base;
pub mod config;
pub mod gobuild;
pub mod layer;
pub mod limit;
pub mod sbom;
pub mod toolchain;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::promise::Abandoned;
use crate::image::{Artifact, ImageError};
use crate::platform::PlatformError;
use crate::reference::Reference;
use crate::util::hash::Digest;

pub use base::{BaseSource, LayoutBase, RegistryBase, StaticBase};
pub use config::BuildConfig;
pub use gobuild::{BuilderConfig, GoBuilder, GoModule};
pub use limit::Limiter;
pub use sbom::{GoVersionSbom, SbomGenerator, SbomInput};
pub use toolchain::{GoToolchain, Invocation, Toolchain};

/// Turns a reference into an artifact.
#[async_trait]
pub trait Builder: Send + Sync {
  /// Canonicalize a reference into its strict, fully-qualified form.
  ///
  /// Must be idempotent.
  fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError>;

  /// Check that a reference names something this builder can build.
  fn is_supported_reference(&self, reference: &Reference) -> Result<(), BuildError>;

  /// Build the artifact for a reference.
  async fn build(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError>;
}

/// Errors that can occur while building a reference.
///
/// Cloneable: a memoized failure is handed to every waiter of the same build.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
  /// Invalid or contradictory builder options.
  #[error("invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Platform(#[from] PlatformError),

  /// No usable `go.mod` above the working directory.
  #[error("go module error in {dir}: {message}")]
  Module { dir: String, message: String },

  #[error("{reference} is outside the main module {module}")]
  OutsideModule { reference: String, module: String },

  #[error("unsupported reference {reference}: {reason}")]
  Unsupported { reference: String, reason: String },

  /// `go build` exited unsuccessfully. Carries combined stdout and stderr.
  #[error("go build failed for {reference}: {output}")]
  Toolchain { reference: String, output: String },

  #[error("malformed environment entry {0:?} (expected KEY=VALUE)")]
  Env(String),

  #[error("invalid variant {variant:?} for {architecture}")]
  Variant { architecture: String, variant: String },

  #[error("template error in {template:?}: {message}")]
  Template { template: String, message: String },

  #[error("failed to fetch base image {base}: {message}")]
  Base { base: String, message: String },

  #[error("base image {base} has no image for platforms {platforms}")]
  NoMatchingPlatform { base: String, platforms: String },

  /// A base index whose child is itself an index.
  #[error("base image {base} contains unexpected nested index {digest}")]
  UnexpectedNesting { base: String, digest: Digest },

  #[error("the scratch base cannot be used with platform \"all\"")]
  ScratchAll,

  #[error("sbom generation failed for {reference}: {message}")]
  Sbom { reference: String, message: String },

  /// The symlink at `path` points back at one of its ancestors.
  #[error("symlink loop in data directory at {path}")]
  DataLoop { path: String },

  #[error(transparent)]
  Image(#[from] ImageError),

  #[error("io error: {0}")]
  Io(Arc<io::Error>),

  #[error("build cancelled")]
  Cancelled,

  #[error(transparent)]
  Abandoned(#[from] Abandoned),
}

impl From<io::Error> for BuildError {
  fn from(err: io::Error) -> Self {
    BuildError::Io(Arc::new(err))
  }
}
