//! Project configuration.
//!
//! Settings come from `.kopack.yaml` in the working directory (or the file or
//! directory named by `KOPACK_CONFIG_PATH`), falling back to the user config
//! directory, then from a handful of environment variables:
//!
//! - `KOPACK_DEFAULTBASEIMAGE` - replaces the default base image
//! - `KOPACK_DOCKER_REPO` - repository images are published under
//! - `SOURCE_DATE_EPOCH` - image creation time, in Unix seconds
//! - `KOPACK_DATA_DATE_EPOCH` - modification time of data layer files
//! - `KOPACK_CACHE` - directory compiled binaries are kept in

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::build::config::BuildConfig;
use crate::build::gobuild::BuilderConfig;
use crate::build::toolchain::split_env;
use crate::consts::{CONFIG_FILENAME, DEFAULT_BASE_IMAGE};
use crate::platform::PlatformMatcher;
use crate::platform::paths::config_dir;

pub const CONFIG_PATH_ENV: &str = "KOPACK_CONFIG_PATH";
pub const DEFAULT_BASE_ENV: &str = "KOPACK_DEFAULTBASEIMAGE";
pub const DOCKER_REPO_ENV: &str = "KOPACK_DOCKER_REPO";
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";
pub const DATA_DATE_EPOCH_ENV: &str = "KOPACK_DATA_DATE_EPOCH";
pub const CACHE_ENV: &str = "KOPACK_CACHE";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid value {value:?} for {name}: {message}")]
  Env {
    name: String,
    value: String,
    message: String,
  },

  #[error("invalid configuration: {0}")]
  Invalid(String),
}

/// Contents of `.kopack.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectConfig {
  pub default_base_image: Option<String>,
  pub base_image_overrides: BTreeMap<String, String>,
  pub default_platforms: Vec<String>,
  pub default_env: Vec<String>,
  pub default_flags: Vec<String>,
  pub default_ldflags: Vec<String>,
  pub builds: Vec<BuildConfig>,
}

impl ProjectConfig {
  pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
    if text.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  /// Load the configuration for `working_dir`. A missing file yields the
  /// defaults.
  pub fn load(working_dir: &Path) -> Result<Self, ConfigError> {
    let Some(path) = locate(working_dir) else {
      debug!(dir = %working_dir.display(), "no project configuration found");
      return Ok(Self::default());
    };
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
      path: path.clone(),
      source,
    })?;
    debug!(path = %path.display(), "loaded project configuration");
    Self::parse(&path, &text)
  }

  /// Combine the file settings with the environment into a validated
  /// builder configuration.
  pub fn into_builder_config(self, working_dir: &Path) -> Result<BuilderConfig, ConfigError> {
    PlatformMatcher::parse(&self.default_platforms).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    for entry in &self.default_env {
      split_env(entry).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }
    for build in &self.builds {
      for entry in &build.env {
        split_env(entry).map_err(|e| ConfigError::Invalid(e.to_string()))?;
      }
    }

    let default_base = env_var(DEFAULT_BASE_ENV)
      .or(self.default_base_image)
      .unwrap_or_else(|| DEFAULT_BASE_IMAGE.to_string());

    Ok(BuilderConfig {
      working_dir: working_dir.to_path_buf(),
      default_base,
      base_overrides: self.base_image_overrides,
      platforms: self.default_platforms,
      environ: std::env::vars().collect(),
      default_env: self.default_env,
      default_flags: self.default_flags,
      default_ldflags: self.default_ldflags,
      builds: self.builds,
      creation_time: epoch_var(SOURCE_DATE_EPOCH_ENV)?,
      data_creation_time: epoch_var(DATA_DATE_EPOCH_ENV)?,
      cache_dir: env_var(CACHE_ENV).map(PathBuf::from),
      ..Default::default()
    })
  }
}

/// Where the configuration for `working_dir` lives, if anywhere.
pub fn locate(working_dir: &Path) -> Option<PathBuf> {
  if let Some(configured) = env_var(CONFIG_PATH_ENV) {
    let configured = PathBuf::from(configured);
    let path = if configured.is_dir() {
      configured.join(CONFIG_FILENAME)
    } else {
      configured
    };
    return path.exists().then_some(path);
  }
  [working_dir.join(CONFIG_FILENAME), config_dir().join("config.yaml")]
    .into_iter()
    .find(|p| p.is_file())
}

/// The repository to publish under, from `KOPACK_DOCKER_REPO`.
pub fn docker_repo() -> Option<String> {
  env_var(DOCKER_REPO_ENV)
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn epoch_var(name: &str) -> Result<Option<DateTime<Utc>>, ConfigError> {
  let Some(value) = env_var(name) else {
    return Ok(None);
  };
  parse_epoch(&value).map(Some).map_err(|message| ConfigError::Env {
    name: name.to_string(),
    value,
    message,
  })
}

/// Parse Unix seconds into a timestamp.
pub fn parse_epoch(value: &str) -> Result<DateTime<Utc>, String> {
  let seconds: i64 = value.trim().parse().map_err(|e| format!("{}", e))?;
  Utc
    .timestamp_opt(seconds, 0)
    .single()
    .ok_or_else(|| "timestamp out of range".to_string())
}
