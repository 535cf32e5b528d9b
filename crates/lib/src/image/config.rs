//! Image configuration documents.
//!
//! Only the fields the builder touches are typed; everything else a base image
//! carries is preserved through the flattened `extra` maps so that re-encoding
//! does not silently drop data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::Platform;
use crate::util::hash::Digest;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
  #[serde(default)]
  pub architecture: String,

  #[serde(default)]
  pub os: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,

  #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
  pub os_version: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,

  #[serde(default)]
  pub config: ContainerConfig,

  #[serde(default)]
  pub rootfs: RootFs,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub history: Vec<History>,

  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// The runtime portion of an image config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entrypoint: Option<Vec<String>>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cmd: Option<Vec<String>>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub working_dir: Option<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,

  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
  #[serde(rename = "type")]
  pub kind: String,

  #[serde(default)]
  pub diff_ids: Vec<Digest>,
}

impl Default for RootFs {
  fn default() -> Self {
    Self {
      kind: "layers".to_string(),
      diff_ids: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_by: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comment: Option<String>,

  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub empty_layer: bool,
}

impl ConfigFile {
  pub fn for_platform(platform: &Platform) -> Self {
    Self {
      architecture: platform.architecture.clone(),
      os: platform.os.clone(),
      variant: platform.variant.clone(),
      os_version: platform.os_version.clone(),
      ..Default::default()
    }
  }

  pub fn platform(&self) -> Platform {
    Platform {
      os: self.os.clone(),
      architecture: self.architecture.clone(),
      variant: self.variant.clone(),
      os_version: self.os_version.clone(),
    }
  }

  /// Append `dir` to `PATH`, or set `PATH` if the config has none.
  pub fn extend_path(&mut self, dir: &str, separator: char) {
    for entry in self.config.env.iter_mut() {
      if let Some(value) = entry.strip_prefix("PATH=") {
        *entry = format!("PATH={}{}{}", value, separator, dir);
        return;
      }
    }
    self.config.env.push(format!("PATH={}", dir));
  }
}
