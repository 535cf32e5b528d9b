//! Repository names for published images.

use std::str::FromStr;

use crate::util::hash::name_hash;

/// How an import path becomes a repository name under the base repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Namer {
  /// `<repo>/<last element>-<hash of import path>`.
  #[default]
  Default,
  /// `<repo>/<full import path>`.
  PreserveImportPaths,
  /// `<repo>/<last element>`.
  BaseImportPaths,
  /// `<repo>` alone.
  Bare,
}

impl Namer {
  /// Repository name for `import_path` under `repo`. Repository names are
  /// lowercase; an empty `repo` yields a bare relative name.
  pub fn name(&self, repo: &str, import_path: &str) -> String {
    let import_path = import_path.trim_end_matches('/');
    let last = import_path.rsplit('/').next().unwrap_or(import_path);
    let suffix = match self {
      Namer::Default => format!("{}-{}", last, name_hash(import_path)),
      Namer::PreserveImportPaths => import_path.to_string(),
      Namer::BaseImportPaths => last.to_string(),
      Namer::Bare => String::new(),
    };
    let repo = repo.trim_end_matches('/');
    let name = match (repo.is_empty(), suffix.is_empty()) {
      (true, _) => suffix,
      (false, true) => repo.to_string(),
      (false, false) => format!("{}/{}", repo, suffix),
    };
    name.to_lowercase()
  }
}

impl FromStr for Namer {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "default" => Ok(Namer::Default),
      "preserve-import-paths" => Ok(Namer::PreserveImportPaths),
      "base-import-paths" => Ok(Namer::BaseImportPaths),
      "bare" => Ok(Namer::Bare),
      other => Err(format!("unknown naming strategy {:?}", other)),
    }
  }
}
