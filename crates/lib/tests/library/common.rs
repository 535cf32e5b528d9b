//! Shared test helpers for library integration tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kopack_lib::build::{BuildError, Builder, Invocation, Toolchain};
use kopack_lib::image::{Artifact, Image};
use kopack_lib::platform::Platform;
use kopack_lib::publish::{PublishError, Publisher};
use kopack_lib::reference::Reference;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

/// Prefix of references the scripted builder refuses.
pub const UNSUPPORTED_PREFIX: &str = "unsupported/";

/// Compiler stand-in: the "binary" is a pure function of package and platform.
#[derive(Debug, Default)]
pub struct EchoToolchain;

#[async_trait]
impl Toolchain for EchoToolchain {
  async fn compile(&self, _ctx: &CancellationToken, invocation: &Invocation) -> Result<PathBuf, BuildError> {
    if let Some(parent) = invocation.output.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let body = format!(
      "{}|{}|{}",
      invocation.reference.path(),
      invocation.platform,
      invocation.flags.join(" ")
    );
    std::fs::write(&invocation.output, body)?;
    Ok(invocation.output.clone())
  }
}

/// A builder with per-reference delays, scripted failures and build counting.
///
/// Each build yields an image labelled with the reference and its build
/// number, so rebuilding the same reference gives a new digest. Delays end
/// early with [`BuildError::Cancelled`] when the token is cancelled.
#[derive(Debug, Default)]
pub struct ScriptedBuilder {
  delays: HashMap<String, Duration>,
  failing: HashSet<String>,
  counts: Mutex<HashMap<String, usize>>,
  running: Mutex<(usize, usize)>,
}

impl ScriptedBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn delay(mut self, path: &str, millis: u64) -> Self {
    self.delays.insert(path.to_string(), Duration::from_millis(millis));
    self
  }

  /// Fail builds of `path` once its delay has passed.
  pub fn fail(mut self, path: &str) -> Self {
    self.failing.insert(path.to_string());
    self
  }

  /// Highest number of builds observed running at once.
  pub fn peak(&self) -> usize {
    self.running.lock().unwrap_or_else(PoisonError::into_inner).1
  }

  pub fn builds_of(&self, path: &str) -> usize {
    self
      .counts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(path)
      .copied()
      .unwrap_or(0)
  }

  pub fn total(&self) -> usize {
    self.counts.lock().unwrap_or_else(PoisonError::into_inner).values().sum()
  }
}

impl ScriptedBuilder {
  async fn finish(&self, ctx: &CancellationToken, path: &str, count: usize) -> Result<Artifact, BuildError> {
    if let Some(delay) = self.delays.get(path) {
      tokio::select! {
        _ = ctx.cancelled() => return Err(BuildError::Cancelled),
        _ = tokio::time::sleep(*delay) => {}
      }
    }
    if self.failing.contains(path) {
      return Err(BuildError::Toolchain {
        reference: path.to_string(),
        output: "scripted failure".to_string(),
      });
    }
    Ok(labelled(path, count).into())
  }
}

#[async_trait]
impl Builder for ScriptedBuilder {
  fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError> {
    Ok(reference.to_strict())
  }

  fn is_supported_reference(&self, reference: &Reference) -> Result<(), BuildError> {
    if reference.path().starts_with(UNSUPPORTED_PREFIX) {
      return Err(BuildError::Unsupported {
        reference: reference.to_string(),
        reason: "refused by test builder".to_string(),
      });
    }
    Ok(())
  }

  async fn build(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError> {
    let path = reference.path().to_string();
    let count = {
      let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
      let count = counts.entry(path.clone()).or_insert(0);
      *count += 1;
      *count
    };
    {
      let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
      running.0 += 1;
      running.1 = running.1.max(running.0);
    }
    let outcome = self.finish(ctx, &path, count).await;
    self.running.lock().unwrap_or_else(PoisonError::into_inner).0 -= 1;
    outcome
  }
}

/// A scratch image carrying `reference` and `build` labels.
pub fn labelled(reference: &str, build: usize) -> Image {
  let mut image = Image::scratch(&Platform::default_target());
  image.config.config.labels.insert("reference".into(), reference.into());
  image.config.config.labels.insert("build".into(), build.to_string());
  image
}

/// Publishes to `<base>/<path>@<digest>`, remembering each name it handed out.
#[derive(Debug)]
pub struct BasePublisher {
  pub base: String,
  published: Mutex<Vec<String>>,
}

impl BasePublisher {
  pub fn new(base: &str) -> Self {
    Self {
      base: base.to_string(),
      published: Mutex::new(Vec::new()),
    }
  }

  pub fn published(&self) -> Vec<String> {
    self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

#[async_trait]
impl Publisher for BasePublisher {
  async fn publish(
    &self,
    _ctx: &CancellationToken,
    artifact: &Artifact,
    reference: &Reference,
  ) -> Result<String, PublishError> {
    let name = format!("{}/{}@{}", self.base, reference.path(), artifact.digest()?);
    self
      .published
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(name.clone());
    Ok(name)
  }

  fn close(&self) -> Result<(), PublishError> {
    Ok(())
  }
}

/// Lay out a Go module with one main package per entry of `mains`.
pub fn write_module(dir: &Path, module: &str, mains: &[&str]) {
  std::fs::write(dir.join("go.mod"), format!("module {}\n\ngo 1.22\n", module)).unwrap();
  for rel in mains {
    let pkg = dir.join(rel);
    std::fs::create_dir_all(&pkg).unwrap();
    std::fs::write(pkg.join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
  }
}

/// Parse a YAML stream into documents.
pub fn documents(text: &str) -> Vec<Value> {
  serde_yaml::Deserializer::from_str(text)
    .map(|d| serde::Deserialize::deserialize(d).unwrap())
    .collect()
}
