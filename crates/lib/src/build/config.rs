//! Per-package build configuration.
//!
//! A project lists [`BuildConfig`]s, each naming a package by `dir` + `main`.
//! A reference picks the entry for its exact import path, else the entry whose
//! package directory contains it most specifically, else the defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  /// Human-readable identifier, only used in logs.
  pub id: String,

  /// Directory (relative to the module root) to run `go build` in.
  pub dir: String,

  /// Package to build, relative to `dir` or as a full import path.
  pub main: String,

  /// Extra `KEY=VALUE` environment entries.
  pub env: Vec<String>,

  /// Extra `go build` flags.
  pub flags: Vec<String>,

  /// Extra linker flags.
  pub ldflags: Vec<String>,
}

impl BuildConfig {
  /// The import path this entry configures, given the main module path.
  pub fn import_path(&self, module_path: &str) -> String {
    if self.main.starts_with(module_path) {
      return clean_import(&self.main);
    }
    let rel = clean_import(&format!("{}/{}", self.dir, self.main));
    if rel.is_empty() {
      module_path.to_string()
    } else {
      format!("{}/{}", module_path, rel)
    }
  }
}

/// Pick the configuration for `import_path`.
pub fn resolve_build_config(builds: &[BuildConfig], module_path: &str, import_path: &str) -> BuildConfig {
  let mut best: Option<(usize, &BuildConfig)> = None;
  for build in builds {
    let candidate = build.import_path(module_path);
    if candidate == import_path {
      return build.clone();
    }
    let contains = import_path
      .strip_prefix(candidate.as_str())
      .is_some_and(|rest| rest.starts_with('/'));
    if contains && best.is_none_or(|(len, _)| candidate.len() > len) {
      best = Some((candidate.len(), build));
    }
  }
  best.map(|(_, b)| b.clone()).unwrap_or_default()
}

/// Lexically clean a slash-separated path: drop `.` and empty elements.
fn clean_import(path: &str) -> String {
  path
    .split('/')
    .filter(|s| !s.is_empty() && *s != ".")
    .collect::<Vec<_>>()
    .join("/")
}

#[cfg(test)]
mod tests {
  use super::*;

  const MODULE: &str = "example.com/app";

  fn cfg(id: &str, dir: &str, main: &str) -> BuildConfig {
    BuildConfig {
      id: id.to_string(),
      dir: dir.to_string(),
      main: main.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn import_path_joins_dir_and_main() {
    assert_eq!(cfg("a", ".", "./cmd/server").import_path(MODULE), "example.com/app/cmd/server");
    assert_eq!(cfg("a", "", "").import_path(MODULE), MODULE);
    assert_eq!(
      cfg("a", "", "example.com/app/cmd/x").import_path(MODULE),
      "example.com/app/cmd/x"
    );
  }

  #[test]
  fn exact_match_wins() {
    let builds = vec![cfg("cmd", "", "./cmd"), cfg("server", "", "./cmd/server")];
    let got = resolve_build_config(&builds, MODULE, "example.com/app/cmd/server");
    assert_eq!(got.id, "server");
  }

  #[test]
  fn longest_containing_directory_wins() {
    let builds = vec![cfg("root", "", "."), cfg("cmd", "", "./cmd")];
    let got = resolve_build_config(&builds, MODULE, "example.com/app/cmd/server");
    assert_eq!(got.id, "cmd");
  }

  #[test]
  fn sibling_prefix_is_not_containment() {
    let builds = vec![cfg("cmd", "", "./cmd")];
    let got = resolve_build_config(&builds, MODULE, "example.com/app/cmdline");
    assert_eq!(got, BuildConfig::default());
  }

  #[test]
  fn defaults_when_nothing_matches() {
    let got = resolve_build_config(&[], MODULE, "example.com/app/cmd/server");
    assert_eq!(got, BuildConfig::default());
  }
}
