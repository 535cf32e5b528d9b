//! Compiled platform filters.

use super::{Platform, PlatformError};

/// The literal that selects every platform a base image offers.
pub const ALL_PLATFORMS: &str = "all";

/// A compiled list of platform specifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformMatcher {
  /// Every platform except `unknown/unknown`.
  All,
  /// Any of the listed platforms.
  Specs(Vec<Platform>),
}

impl PlatformMatcher {
  /// Compile platform specifications.
  ///
  /// `"all"` must appear alone.
  pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, PlatformError> {
    let has_all = specs.iter().any(|s| s.as_ref() == ALL_PLATFORMS);
    if has_all {
      if specs.len() > 1 {
        let joined: Vec<&str> = specs.iter().map(AsRef::as_ref).collect();
        return Err(PlatformError::AllCombined { specs: joined.join(",") });
      }
      return Ok(PlatformMatcher::All);
    }

    let platforms = specs
      .iter()
      .map(|s| s.as_ref().parse::<Platform>())
      .collect::<Result<Vec<_>, _>>()?;
    Ok(PlatformMatcher::Specs(platforms))
  }

  pub fn single(platform: Platform) -> Self {
    PlatformMatcher::Specs(vec![platform])
  }

  /// Whether more than one output platform may be produced.
  pub fn is_multi(&self) -> bool {
    match self {
      PlatformMatcher::All => true,
      PlatformMatcher::Specs(specs) => specs.len() > 1,
    }
  }

  /// The concrete platforms listed (empty for `All`).
  pub fn platforms(&self) -> &[Platform] {
    match self {
      PlatformMatcher::All => &[],
      PlatformMatcher::Specs(specs) => specs,
    }
  }

  pub fn matches(&self, candidate: &Platform) -> bool {
    match self {
      PlatformMatcher::All => !candidate.is_unknown(),
      PlatformMatcher::Specs(specs) => specs.iter().any(|spec| spec_matches(spec, candidate)),
    }
  }
}

fn spec_matches(spec: &Platform, candidate: &Platform) -> bool {
  if !spec.os.is_empty() && spec.os != candidate.os {
    return false;
  }
  if !spec.architecture.is_empty() && spec.architecture != candidate.architecture {
    return false;
  }
  if let Some(variant) = &spec.variant
    && candidate.variant.as_ref() != Some(variant)
  {
    return false;
  }
  match &spec.os_version {
    None => true,
    Some(wanted) if spec.is_windows() => candidate
      .os_version
      .as_deref()
      .is_some_and(|have| is_version_prefix(wanted, have)),
    Some(wanted) => candidate.os_version.as_deref() == Some(wanted.as_str()),
  }
}

/// Windows images advertise full build numbers; a spec may name a prefix of them.
fn is_version_prefix(prefix: &str, version: &str) -> bool {
  let wanted: Vec<&str> = prefix.split('.').collect();
  let have: Vec<&str> = version.split('.').collect();
  wanted.len() <= have.len() && wanted.iter().zip(&have).all(|(a, b)| a == b)
}
