//! Optional SBOM generation.
//!
//! An SBOM is published as an attachment next to the image it describes and
//! never changes the image digest.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BuildError;
use crate::platform::Platform;
use crate::reference::Reference;

/// Media type of `go version -m` output.
pub const GO_VERSION_M_MEDIA_TYPE: &str = "application/vnd.go.version-m";

/// Attachment name SBOMs are published under.
pub const SBOM_ATTACHMENT: &str = "sbom";

/// What a generator gets to look at.
#[derive(Debug, Clone)]
pub struct SbomInput {
  pub reference: Reference,
  /// The compiled executable.
  pub binary: PathBuf,
  pub platform: Platform,
}

/// Produces an SBOM payload and its media type.
#[async_trait]
pub trait SbomGenerator: Send + Sync {
  async fn generate(&self, ctx: &CancellationToken, input: &SbomInput) -> Result<(Vec<u8>, String), BuildError>;
}

/// Embeds the module information the Go linker records in every binary.
#[derive(Debug, Clone)]
pub struct GoVersionSbom {
  program: PathBuf,
}

impl Default for GoVersionSbom {
  fn default() -> Self {
    Self {
      program: PathBuf::from("go"),
    }
  }
}

impl GoVersionSbom {
  pub fn with_program(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }
}

#[async_trait]
impl SbomGenerator for GoVersionSbom {
  async fn generate(&self, ctx: &CancellationToken, input: &SbomInput) -> Result<(Vec<u8>, String), BuildError> {
    let mut command = Command::new(&self.program);
    command.arg("version").arg("-m").arg(&input.binary).kill_on_drop(true);

    let output = tokio::select! {
      output = command.output() => output?,
      _ = ctx.cancelled() => return Err(BuildError::Cancelled),
    };
    if !output.status.success() {
      return Err(BuildError::Sbom {
        reference: input.reference.to_string(),
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    // The first line names the temporary binary path; report the package instead.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let binary = input.binary.display().to_string();
    let payload = stdout.replacen(&binary, input.reference.path(), 1);
    debug!(reference = %input.reference, bytes = payload.len(), "generated sbom");
    Ok((payload.into_bytes(), GO_VERSION_M_MEDIA_TYPE.to_string()))
  }
}
