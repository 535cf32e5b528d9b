//! Content digests for images, layers and blobs.
//!
//! This module provides:
//! - `Digest`: an `algorithm:hex` content address (always SHA-256 here)
//! - `Digest::of()`: hashing of in-memory bytes
//! - `name_hash()`: truncated hash used to derive stable image names

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::consts::NAME_HASH_LEN;

const SHA256_PREFIX: &str = "sha256:";

/// A content-addressed SHA-256 digest.
///
/// # Format
///
/// `sha256:` followed by 64 lowercase hexadecimal characters, e.g.
/// `"sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

/// Error parsing a digest string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
  #[error("unsupported digest algorithm in {0:?} (only sha256 is supported)")]
  Algorithm(String),

  #[error("malformed sha256 digest {0:?}")]
  Malformed(String),
}

impl Digest {
  /// Hash arbitrary bytes.
  pub fn of(data: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize())))
  }

  /// The full `sha256:<hex>` form.
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The hex portion without the algorithm prefix.
  pub fn hex(&self) -> &str {
    &self.0[SHA256_PREFIX.len()..]
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for Digest {
  type Err = DigestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let Some(hex_part) = s.strip_prefix(SHA256_PREFIX) else {
      return Err(DigestError::Algorithm(s.to_string()));
    };
    let valid = hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
      return Err(DigestError::Malformed(s.to_string()));
    }
    Ok(Digest(s.to_string()))
  }
}

impl TryFrom<String> for Digest {
  type Error = DigestError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Digest> for String {
  fn from(value: Digest) -> Self {
    value.0
  }
}

/// Truncated hex SHA-256 of a string, used to keep generated names stable and short.
pub fn name_hash(input: &str) -> String {
  let full = Digest::of(input.as_bytes());
  full.hex()[..NAME_HASH_LEN].to_string()
}
