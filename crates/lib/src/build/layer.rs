//! Deterministic filesystem layers.
//!
//! Every header field that could vary between hosts is pinned: mode, owner,
//! and timestamps are fixed, entries are emitted in a stable order, and
//! compression carries no header metadata. Identical inputs therefore produce
//! byte-identical layers.
//!
//! Windows layers use the container layer format: two roots, `Hives/` and
//! `Files/`, with the filesystem under `Files/`. The executable carries a fixed
//! security descriptor so the image runs without the host's ACLs leaking in.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tar::{EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::BuildError;
use crate::image::Layer;
use crate::platform::Platform;

/// Mode of every file and directory in generated layers.
pub const LAYER_MODE: u32 = 0o555;

const WINDOWS_FILES_ROOT: &str = "Files";
const WINDOWS_HIVES_ROOT: &str = "Hives";

/// PAX key Windows uses for a raw security descriptor.
const WINDOWS_SD_KEY: &str = "MSWINDOWS.rawsd";

/// Base64 security descriptor: owner BUILTIN\Administrators, group
/// NT AUTHORITY\SYSTEM, no DACL entries beyond inheritance.
const WINDOWS_SD_VALUE: &str = "AQAAgBQAAAAkAAAAAAAAAAAAAAABAgAAAAAABSAAAAAhAgAAAQEAAAAAAAUSAAAA";

/// Tar writer that emits each directory exactly once, parents first.
struct LayerWriter {
  builder: tar::Builder<Vec<u8>>,
  dirs: BTreeSet<String>,
  mtime: u64,
  windows: bool,
}

impl LayerWriter {
  fn new(platform: &Platform, mtime: u64) -> io::Result<Self> {
    let mut writer = Self {
      builder: tar::Builder::new(Vec::new()),
      dirs: BTreeSet::new(),
      mtime,
      windows: platform.is_windows(),
    };
    if writer.windows {
      writer.raw_dir(WINDOWS_HIVES_ROOT)?;
      writer.raw_dir(WINDOWS_FILES_ROOT)?;
    }
    Ok(writer)
  }

  /// Map an absolute image path to its name inside the tar.
  fn entry_name(&self, path: &str) -> String {
    let rel = path.trim_start_matches('/');
    if self.windows {
      format!("{}/{}", WINDOWS_FILES_ROOT, rel)
    } else {
      rel.to_string()
    }
  }

  fn header(&self, entry_type: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(LAYER_MODE);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(self.mtime);
    header.set_size(size);
    header
  }

  fn raw_dir(&mut self, name: &str) -> io::Result<()> {
    if !self.dirs.insert(name.to_string()) {
      return Ok(());
    }
    let mut header = self.header(EntryType::Directory, 0);
    self.builder.append_data(&mut header, name, io::empty())
  }

  /// Emit `path` and every missing ancestor, root to leaf.
  fn dir_all(&mut self, path: &str) -> io::Result<()> {
    let rel = path.trim_matches('/');
    if rel.is_empty() {
      return Ok(());
    }
    let mut prefix = String::new();
    for segment in rel.split('/') {
      if !prefix.is_empty() {
        prefix.push('/');
      }
      prefix.push_str(segment);
      let name = self.entry_name(&prefix);
      self.raw_dir(&name)?;
    }
    Ok(())
  }

  fn file(&mut self, path: &str, source: &Path, security_descriptor: bool) -> io::Result<()> {
    if let Some((parent, _)) = path.trim_start_matches('/').rsplit_once('/') {
      self.dir_all(parent)?;
    }
    let name = self.entry_name(path);
    let file = File::open(source)?;
    let size = file.metadata()?.len();

    if security_descriptor {
      self
        .builder
        .append_pax_extensions([(WINDOWS_SD_KEY, WINDOWS_SD_VALUE.as_bytes())])?;
    }
    let mut header = self.header(EntryType::Regular, size);
    self.builder.append_data(&mut header, name, file)
  }

  fn finish(self) -> io::Result<Vec<u8>> {
    self.builder.into_inner()
  }
}

/// Package a compiled executable at `dest` (an absolute, slash-separated
/// image path such as `/ko-app/server`).
pub fn package_binary(exe: &Path, dest: &str, platform: &Platform) -> Result<Layer, BuildError> {
  let mut writer = LayerWriter::new(platform, 0)?;
  writer.file(dest, exe, platform.is_windows())?;
  let tar = writer.finish()?;
  debug!(dest, bytes = tar.len(), "packaged binary layer");
  Ok(Layer::from_tar(&tar)?)
}

/// Package the data tree under `root` at `dest_root` (e.g. `/var/run/ko`).
///
/// Symlinks are followed; a link cycle is an error. Windows targets skip
/// symlinks entirely. A missing `root` yields only the destination
/// directories.
pub fn package_data_tree(root: &Path, dest_root: &str, platform: &Platform, mtime: u64) -> Result<Layer, BuildError> {
  let mut writer = LayerWriter::new(platform, mtime)?;
  writer.dir_all(dest_root)?;

  if root.is_dir() {
    let dest_root = dest_root.trim_end_matches('/');
    let mut entries = WalkDir::new(root)
      .min_depth(1)
      .follow_links(true)
      .sort_by_file_name()
      .into_iter();

    while let Some(entry) = entries.next() {
      let entry = entry.map_err(|e| walk_error(root, e))?;
      if platform.is_windows() && entry.path_is_symlink() {
        warn!(path = %entry.path().display(), "skipping symlink in data directory for windows image");
        if entry.file_type().is_dir() {
          entries.skip_current_dir();
        }
        continue;
      }

      let rel = relative_slash_path(root, entry.path());
      let dest = format!("{}/{}", dest_root, rel);
      if entry.file_type().is_dir() {
        writer.dir_all(&dest)?;
      } else if entry.file_type().is_file() {
        writer.file(&dest, entry.path(), false)?;
      }
    }
  } else {
    debug!(root = %root.display(), "no data directory");
  }

  let tar = writer.finish()?;
  Ok(Layer::from_tar(&tar)?)
}

fn walk_error(root: &Path, err: walkdir::Error) -> BuildError {
  if err.loop_ancestor().is_some() {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    return BuildError::DataLoop {
      path: path.display().to_string(),
    };
  }
  match err.into_io_error() {
    Some(io) => BuildError::from(io),
    None => BuildError::from(io::Error::other("data directory walk failed")),
  }
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
  let rel: PathBuf = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_default();
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join("/")
}
