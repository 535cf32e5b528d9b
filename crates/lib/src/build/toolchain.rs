//! The `go build` invocation.
//!
//! Everything that feeds the compiler (environment, flags, output location) is
//! derived here deterministically so that two builds of the same package with
//! the same configuration see exactly the same inputs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::BuildError;
use super::config::BuildConfig;
use crate::platform::Platform;
use crate::reference::Reference;

/// A fully-derived compiler call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  /// Strict, qualified import path of the package.
  pub reference: Reference,
  /// Directory to run the compiler in.
  pub dir: PathBuf,
  pub platform: Platform,
  pub env: BTreeMap<String, String>,
  /// Flags placed between `build` and `-o`.
  pub flags: Vec<String>,
  /// Path the executable is written to.
  pub output: PathBuf,
}

/// Out-of-process compiler.
#[async_trait]
pub trait Toolchain: Send + Sync {
  /// Compile the package and return the path of the produced executable.
  async fn compile(&self, ctx: &CancellationToken, invocation: &Invocation) -> Result<PathBuf, BuildError>;
}

/// Runs the `go` binary found on `PATH` (or an explicit program).
#[derive(Debug, Clone)]
pub struct GoToolchain {
  program: PathBuf,
}

impl Default for GoToolchain {
  fn default() -> Self {
    Self {
      program: PathBuf::from("go"),
    }
  }
}

impl GoToolchain {
  pub fn with_program(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }
}

#[async_trait]
impl Toolchain for GoToolchain {
  async fn compile(&self, ctx: &CancellationToken, invocation: &Invocation) -> Result<PathBuf, BuildError> {
    info!(reference = %invocation.reference, platform = %invocation.platform, "compiling");

    let mut command = Command::new(&self.program);
    command
      .arg("build")
      .args(&invocation.flags)
      .arg("-o")
      .arg(&invocation.output)
      .arg(invocation.reference.path())
      .current_dir(&invocation.dir)
      .env_clear()
      .envs(&invocation.env)
      .kill_on_drop(true);

    debug!(dir = ?invocation.dir, flags = ?invocation.flags, "spawning go build");

    let output = tokio::select! {
      output = command.output() => output?,
      _ = ctx.cancelled() => return Err(BuildError::Cancelled),
    };

    if !output.status.success() {
      let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
      combined.push_str(&String::from_utf8_lossy(&output.stderr));
      return Err(BuildError::Toolchain {
        reference: invocation.reference.to_string(),
        output: combined.trim().to_string(),
      });
    }

    Ok(invocation.output.clone())
  }
}

/// Toggles that apply to every build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagDefaults {
  pub trimpath: bool,
  pub disable_optimizations: bool,
  pub flags: Vec<String>,
  pub ldflags: Vec<String>,
}

/// Derive the compiler environment. Later sources win:
///
/// 1. `CGO_ENABLED=0`
/// 2. the ambient environment
/// 3. `GOOS`, `GOARCH` (and `GOARM` on `arm`) from the target platform
/// 4. project default env
/// 5. per-build env
pub fn build_env(
  platform: &Platform,
  default_env: &[String],
  build_env: &[String],
  environ: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, BuildError> {
  let mut env = BTreeMap::new();
  env.insert("CGO_ENABLED".to_string(), "0".to_string());
  env.extend(environ.iter().map(|(k, v)| (k.clone(), v.clone())));
  env.insert("GOOS".to_string(), platform.os.clone());
  env.insert("GOARCH".to_string(), platform.architecture.clone());
  if let Some(goarm) = goarm(platform)? {
    env.insert("GOARM".to_string(), goarm);
  }
  for entry in default_env.iter().chain(build_env) {
    let (key, value) = split_env(entry)?;
    env.insert(key.to_string(), value.to_string());
  }
  Ok(env)
}

/// Split a `KEY=VALUE` entry.
pub fn split_env(entry: &str) -> Result<(&str, &str), BuildError> {
  match entry.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key, value)),
    _ => Err(BuildError::Env(entry.to_string())),
  }
}

/// `GOARM` for a platform. Only 32-bit ARM with a `v<digits>` variant yields
/// a value; 64-bit ARM variants are not mapped.
pub fn goarm(platform: &Platform) -> Result<Option<String>, BuildError> {
  if platform.architecture != "arm" {
    return Ok(None);
  }
  let Some(variant) = &platform.variant else {
    return Ok(None);
  };
  match variant.strip_prefix('v') {
    Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => Ok(Some(digits.to_string())),
    _ => Err(BuildError::Variant {
      architecture: platform.architecture.clone(),
      variant: variant.clone(),
    }),
  }
}

/// Derive the compiler flags for one build.
pub fn build_flags(
  config: &BuildConfig,
  defaults: &FlagDefaults,
  env: &BTreeMap<String, String>,
) -> Result<Vec<String>, BuildError> {
  let mut flags = Vec::new();
  if defaults.trimpath {
    flags.push("-trimpath".to_string());
  }
  if defaults.disable_optimizations {
    flags.push("-gcflags".to_string());
    flags.push("all=-N -l".to_string());
  }
  for flag in defaults.flags.iter().chain(&config.flags) {
    flags.push(expand_template(flag, env)?);
  }

  let ldflags = defaults
    .ldflags
    .iter()
    .chain(&config.ldflags)
    .map(|f| expand_template(f, env))
    .collect::<Result<Vec<_>, _>>()?;
  if !ldflags.is_empty() {
    flags.push(format!("-ldflags={}", ldflags.join(" ")));
  }
  Ok(flags)
}

/// Expand `{{.Env.NAME}}` placeholders from `env`.
pub fn expand_template(template: &str, env: &BTreeMap<String, String>) -> Result<String, BuildError> {
  let err = |message: String| BuildError::Template {
    template: template.to_string(),
    message,
  };

  let mut out = String::with_capacity(template.len());
  let mut rest = template;
  while let Some(start) = rest.find("{{") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    let Some(end) = after.find("}}") else {
      return Err(err("unclosed action".to_string()));
    };
    let action = after[..end].trim();
    let Some(name) = action.strip_prefix(".Env.") else {
      return Err(err(format!("unsupported action {:?}", action)));
    };
    match env.get(name) {
      Some(value) => out.push_str(value),
      None => return Err(err(format!("environment variable {} is not set", name))),
    }
    rest = &after[end + 2..];
  }
  out.push_str(rest);
  Ok(out)
}
