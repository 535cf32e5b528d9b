//! Target platforms and platform filters.
//!
//! A [`Platform`] names an OS/architecture/variant/OS-version target the way OCI
//! descriptors and image configs do. The same type doubles as a filter, where an
//! empty `os` or `architecture` means "not constrained".

pub mod matcher;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use matcher::PlatformMatcher;

/// Errors produced while parsing platform specifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
  #[error("invalid platform {spec:?}: too many segments (expected os[/arch[/variant]])")]
  TooManySegments { spec: String },

  #[error("invalid platform {spec:?}: empty segment")]
  EmptySegment { spec: String },

  #[error("invalid platform {spec:?}: malformed os version {version:?}")]
  OsVersion { spec: String, version: String },

  #[error("platform \"all\" cannot be combined with other platforms: {specs}")]
  AllCombined { specs: String },
}

/// An OS/architecture target, as carried by image configs and index descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
  #[serde(default)]
  pub os: String,

  #[serde(default)]
  pub architecture: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,

  #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
  pub os_version: Option<String>,
}

impl Platform {
  pub fn new(os: &str, architecture: &str) -> Self {
    Self {
      os: os.to_string(),
      architecture: architecture.to_string(),
      variant: None,
      os_version: None,
    }
  }

  pub fn with_variant(mut self, variant: &str) -> Self {
    self.variant = Some(variant.to_string());
    self
  }

  pub fn with_os_version(mut self, version: &str) -> Self {
    self.os_version = Some(version.to_string());
    self
  }

  /// The target used when nothing else is requested.
  pub fn default_target() -> Self {
    Self::new("linux", "amd64")
  }

  pub fn is_windows(&self) -> bool {
    self.os == "windows"
  }

  /// Attestation manifests in multi-platform indices use `unknown/unknown`.
  pub fn is_unknown(&self) -> bool {
    self.os == "unknown" && self.architecture == "unknown"
  }

  /// A filesystem-safe rendering, e.g. `linux-arm-v7`.
  pub fn slug(&self) -> String {
    let mut parts = vec![self.os.as_str(), self.architecture.as_str()];
    if let Some(variant) = &self.variant {
      parts.push(variant);
    }
    parts.retain(|p| !p.is_empty());
    parts.join("-")
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.os)?;
    if !self.architecture.is_empty() {
      write!(f, "/{}", self.architecture)?;
    }
    if let Some(variant) = &self.variant {
      write!(f, "/{}", variant)?;
    }
    if let Some(version) = &self.os_version {
      write!(f, ":{}", version)?;
    }
    Ok(())
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  /// Parse `os[/arch[/variant]][:osversion]`.
  fn from_str(spec: &str) -> Result<Self, Self::Err> {
    let (triple, os_version) = match spec.split_once(':') {
      Some((triple, version)) => {
        let malformed = version
          .split('.')
          .any(|part| part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()));
        if malformed {
          return Err(PlatformError::OsVersion {
            spec: spec.to_string(),
            version: version.to_string(),
          });
        }
        (triple, Some(version.to_string()))
      }
      None => (spec, None),
    };

    let segments: Vec<&str> = triple.split('/').collect();
    if segments.len() > 3 {
      return Err(PlatformError::TooManySegments { spec: spec.to_string() });
    }
    if segments.iter().any(|s| s.is_empty()) {
      return Err(PlatformError::EmptySegment { spec: spec.to_string() });
    }

    Ok(Platform {
      os: segments[0].to_string(),
      architecture: segments.get(1).map(|s| s.to_string()).unwrap_or_default(),
      variant: segments.get(2).map(|s| s.to_string()),
      os_version,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_os_only() {
    let p: Platform = "linux".parse().unwrap();
    assert_eq!(p.os, "linux");
    assert!(p.architecture.is_empty());
    assert_eq!(p.variant, None);
  }

  #[test]
  fn parses_full_triple() {
    let p: Platform = "linux/arm/v7".parse().unwrap();
    assert_eq!(p, Platform::new("linux", "arm").with_variant("v7"));
  }

  #[test]
  fn parses_os_version() {
    let p: Platform = "windows/amd64:10.0.17763.1234".parse().unwrap();
    assert_eq!(p.os_version.as_deref(), Some("10.0.17763.1234"));
    assert_eq!(p.architecture, "amd64");
  }

  #[test]
  fn rejects_four_segments() {
    let err = "linux/arm/v7/extra".parse::<Platform>().unwrap_err();
    assert!(matches!(err, PlatformError::TooManySegments { .. }));
  }

  #[test]
  fn rejects_empty_segments_and_versions() {
    assert!(matches!(
      "linux//v7".parse::<Platform>(),
      Err(PlatformError::EmptySegment { .. })
    ));
    assert!(matches!(
      "windows/amd64:".parse::<Platform>(),
      Err(PlatformError::OsVersion { .. })
    ));
    assert!(matches!(
      "windows/amd64:10..1".parse::<Platform>(),
      Err(PlatformError::OsVersion { .. })
    ));
  }

  #[test]
  fn rejects_non_numeric_versions() {
    for spec in ["linux/amd64:abc", "windows/amd64:10.0.x", "windows/amd64:10.-1", "windows/amd64:1 .2"] {
      let err = spec.parse::<Platform>().unwrap_err();
      assert_eq!(
        err,
        PlatformError::OsVersion {
          spec: spec.to_string(),
          version: spec.split_once(':').unwrap().1.to_string(),
        }
      );
    }
  }

  #[test]
  fn display_round_trips() {
    for spec in ["linux/amd64", "linux/arm/v6", "windows/amd64:10.0.20348"] {
      let p: Platform = spec.parse().unwrap();
      assert_eq!(p.to_string(), spec);
    }
  }

  #[test]
  fn serializes_with_oci_field_names() {
    let p = Platform::new("windows", "amd64").with_os_version("10.0.17763");
    let json = serde_json::to_value(&p).unwrap();
    assert_eq!(json["architecture"], "amd64");
    assert_eq!(json["os.version"], "10.0.17763");
    assert!(json.get("variant").is_none());
  }

  #[test]
  fn slug_is_filesystem_safe() {
    assert_eq!(Platform::new("linux", "arm").with_variant("v7").slug(), "linux-arm-v7");
  }
}
