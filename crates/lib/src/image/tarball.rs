//! `docker save` compatible tarballs.
//!
//! Layout of the archive:
//!
//! ```text
//! manifest.json              [{"Config", "RepoTags", "Layers"}]
//! <config hex>.json
//! <layer hex>.tar.gz
//! ```

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;

use super::ImageError;
use super::types::Image;

/// One image and the tags it should be loaded under.
#[derive(Debug, Clone)]
pub struct TarballEntry {
  pub image: Arc<Image>,
  pub tags: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SaveManifestEntry {
  config: String,
  repo_tags: Vec<String>,
  layers: Vec<String>,
}

/// Write `entries` as a single tarball. Shared layers are stored once.
pub fn write_tarball<W: Write>(out: W, entries: &[TarballEntry]) -> Result<(), ImageError> {
  let mut builder = tar::Builder::new(out);
  let mut written = BTreeSet::new();
  let mut manifest = Vec::with_capacity(entries.len());

  for entry in entries {
    let raw_config = entry.image.raw_config()?;
    let config_name = format!("{}.json", crate::util::hash::Digest::of(&raw_config).hex());
    if written.insert(config_name.clone()) {
      append(&mut builder, &config_name, &raw_config)?;
    }

    let mut layers = Vec::with_capacity(entry.image.layers.len());
    for layer in &entry.image.layers {
      let name = format!("{}.tar.gz", layer.digest.hex());
      if written.insert(name.clone()) {
        append(&mut builder, &name, &layer.compressed()?)?;
      }
      layers.push(name);
    }

    manifest.push(SaveManifestEntry {
      config: config_name,
      repo_tags: entry.tags.clone(),
      layers,
    });
  }

  let raw_manifest = serde_json::to_vec(&manifest).map_err(|e| ImageError::encode("manifest.json", e))?;
  append(&mut builder, "manifest.json", &raw_manifest)?;

  let mut out = builder.into_inner().map_err(|e| ImageError::io("tarball", e))?;
  out.flush().map_err(|e| ImageError::io("tarball", e))
}

fn append<W: Write>(builder: &mut tar::Builder<W>, name: &str, bytes: &[u8]) -> Result<(), ImageError> {
  let mut header = tar::Header::new_ustar();
  header.set_size(bytes.len() as u64);
  header.set_mode(0o644);
  header.set_mtime(0);
  header.set_entry_type(tar::EntryType::Regular);
  builder
    .append_data(&mut header, name, bytes)
    .map_err(|e| ImageError::io(name, e))
}
