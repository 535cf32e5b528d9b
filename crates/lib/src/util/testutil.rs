//! Test doubles for kopack-lib unit tests.
//!
//! Provides a fake compiler, a throwaway Go module on disk, and in-memory
//! builder and publisher implementations with call accounting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::build::{BuildError, Builder, Invocation, Toolchain};
use crate::image::{Artifact, Image};
use crate::platform::Platform;
use crate::publish::{PublishError, Publisher};
use crate::reference::Reference;

/// Writes a fake executable whose bytes depend only on the package and
/// platform.
#[derive(Debug, Default)]
pub struct FakeToolchain {
  invocations: Mutex<Vec<Invocation>>,
}

impl FakeToolchain {
  pub fn calls(&self) -> usize {
    self.invocations.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn last(&self) -> Option<Invocation> {
    self.invocations.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
  }
}

#[async_trait]
impl Toolchain for FakeToolchain {
  async fn compile(&self, _ctx: &CancellationToken, invocation: &Invocation) -> Result<PathBuf, BuildError> {
    self
      .invocations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(invocation.clone());
    if let Some(parent) = invocation.output.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let content = format!("binary {} {}", invocation.reference.path(), invocation.platform);
    std::fs::write(&invocation.output, content)?;
    Ok(invocation.output.clone())
  }
}

/// Lay out a Go module at `dir`. Each package is `(relative dir, package name)`.
pub fn write_go_module(dir: &Path, module: &str, packages: &[(&str, &str)]) {
  std::fs::create_dir_all(dir).unwrap();
  std::fs::write(dir.join("go.mod"), format!("module {}\n\ngo 1.22\n", module)).unwrap();
  for (rel, name) in packages {
    let pkg = dir.join(rel);
    std::fs::create_dir_all(&pkg).unwrap();
    std::fs::write(pkg.join("main.go"), format!("package {}\n\nfunc main() {{}}\n", name)).unwrap();
    std::fs::write(pkg.join("main_test.go"), format!("package {}_test\n", name)).unwrap();
  }
}

/// A builder that produces a small image per reference and records calls.
///
/// Every reference whose path starts with `example.com/` is supported. The
/// image carries the reference and the build generation as labels, so a
/// rebuild after invalidation yields a new digest.
#[derive(Debug, Default)]
pub struct FakeBuilder {
  delays: HashMap<String, Duration>,
  failing: HashSet<String>,
  builds: Mutex<BTreeMap<String, usize>>,
}

impl FakeBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(mut self, path: &str, millis: u64) -> Self {
    self.delays.insert(path.to_string(), Duration::from_millis(millis));
    self
  }

  pub fn failing(mut self, path: &str) -> Self {
    self.failing.insert(path.to_string());
    self
  }

  /// Number of builds started for `path`.
  pub fn builds_of(&self, path: &str) -> usize {
    self
      .builds
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(path)
      .copied()
      .unwrap_or(0)
  }

  pub fn total_builds(&self) -> usize {
    self.builds.lock().unwrap_or_else(PoisonError::into_inner).values().sum()
  }
}

#[async_trait]
impl Builder for FakeBuilder {
  fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError> {
    Ok(reference.to_strict())
  }

  fn is_supported_reference(&self, reference: &Reference) -> Result<(), BuildError> {
    if reference.path().starts_with("example.com/") {
      Ok(())
    } else {
      Err(BuildError::Unsupported {
        reference: reference.to_string(),
        reason: "not in example.com".to_string(),
      })
    }
  }

  async fn build(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError> {
    let path = reference.path().to_string();
    let generation = {
      let mut builds = self.builds.lock().unwrap_or_else(PoisonError::into_inner);
      let count = builds.entry(path.clone()).or_insert(0);
      *count += 1;
      *count
    };
    if let Some(delay) = self.delays.get(&path) {
      tokio::select! {
        _ = tokio::time::sleep(*delay) => {}
        _ = ctx.cancelled() => return Err(BuildError::Cancelled),
      }
    }
    if self.failing.contains(&path) {
      return Err(BuildError::Toolchain {
        reference: reference.to_string(),
        output: "compile error".to_string(),
      });
    }
    let mut image = Image::scratch(&Platform::default_target());
    image.config.config.labels.insert("reference".to_string(), path);
    image
      .config
      .config
      .labels
      .insert("generation".to_string(), generation.to_string());
    Ok(image.into())
  }
}

/// A publisher that hands back `registry.example/<path>@<digest>`.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
  published: Mutex<Vec<String>>,
}

impl RecordingPublisher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reference paths published so far, in order.
  pub fn published(&self) -> Vec<String> {
    self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

#[async_trait]
impl Publisher for RecordingPublisher {
  async fn publish(
    &self,
    _ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    self
      .published
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(reference.path().to_string());
    Ok(format!("registry.example/{}@{}", reference.path(), artifact.digest()?))
  }

  fn close(&self) -> Result<(), PublishError> {
    Ok(())
  }
}
