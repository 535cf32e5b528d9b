//! The Go image builder.
//!
//! For each requested platform the package is compiled, its binary and
//! `kodata` tree are packaged into two layers, and both are appended to the
//! matching base image. Base indices produce a new index with one child per
//! matching platform.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::base::BaseSource;
use super::config::{BuildConfig, resolve_build_config};
use super::layer::{package_binary, package_data_tree};
use super::sbom::{SBOM_ATTACHMENT, SbomGenerator, SbomInput};
use super::toolchain::{FlagDefaults, Invocation, Toolchain, build_env, build_flags, split_env};
use super::{BuildError, Builder};
use crate::cache::promise::{Abandoned, Promise, PromiseMap};
use crate::consts::{
  APP_DIR, DEFAULT_BASE_IMAGE, IMAGE_AUTHOR, KO_DATA_PATH_ENV, KODATA_DIR, KODATA_ROOT, SCRATCH, WINDOWS_APP_DIR,
  WINDOWS_KODATA_ROOT,
};
use crate::image::{Artifact, Attachment, History, Image, ImageIndex, IndexEntry, media};
use crate::platform::{Platform, PlatformMatcher};
use crate::reference::Reference;
use crate::util::hash::name_hash;

/// Ambient variables that pick the target platform when none is configured.
const PLATFORM_ENV: [&str; 3] = ["GOOS", "GOARCH", "GOARM"];

/// Windows containers run as this user unless the base says otherwise.
const WINDOWS_USER: &str = "ContainerAdministrator";

/// Everything the Go builder needs to know, resolved up front.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
  /// Directory local references are relative to.
  pub working_dir: PathBuf,
  pub default_base: String,
  /// Base image per import path.
  pub base_overrides: BTreeMap<String, String>,
  /// Platform specifications; empty means "derive from the environment".
  pub platforms: Vec<String>,
  /// The ambient environment handed to the compiler.
  pub environ: BTreeMap<String, String>,
  pub default_env: Vec<String>,
  pub default_flags: Vec<String>,
  pub default_ldflags: Vec<String>,
  pub builds: Vec<BuildConfig>,
  pub labels: BTreeMap<String, String>,
  /// Stamped into the config and history when set; otherwise the base's
  /// timestamp is kept.
  pub creation_time: Option<DateTime<Utc>>,
  /// Modification time of files in the data layer (epoch when unset).
  pub data_creation_time: Option<DateTime<Utc>>,
  pub trimpath: bool,
  pub disable_optimizations: bool,
  /// Keep compiled binaries here instead of a temporary directory.
  pub cache_dir: Option<PathBuf>,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      working_dir: PathBuf::from("."),
      default_base: DEFAULT_BASE_IMAGE.to_string(),
      base_overrides: BTreeMap::new(),
      platforms: Vec::new(),
      environ: BTreeMap::new(),
      default_env: Vec::new(),
      default_flags: Vec::new(),
      default_ldflags: Vec::new(),
      builds: Vec::new(),
      labels: BTreeMap::new(),
      creation_time: None,
      data_creation_time: None,
      trimpath: true,
      disable_optimizations: false,
      cache_dir: None,
    }
  }
}

/// The main Go module a builder works within.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoModule {
  /// Module path from the `module` directive.
  pub path: String,
  /// Directory holding `go.mod`.
  pub dir: PathBuf,
}

impl GoModule {
  /// Find the nearest `go.mod` at or above `start`.
  pub fn discover(start: &Path) -> Result<Self, BuildError> {
    for dir in start.ancestors() {
      let go_mod = dir.join("go.mod");
      if !go_mod.is_file() {
        continue;
      }
      let contents = std::fs::read_to_string(&go_mod)?;
      return match parse_module_directive(&contents) {
        Some(path) => Ok(Self {
          path,
          dir: dir.to_path_buf(),
        }),
        None => Err(BuildError::Module {
          dir: dir.display().to_string(),
          message: "go.mod has no module directive".to_string(),
        }),
      };
    }
    Err(BuildError::Module {
      dir: start.display().to_string(),
      message: "no go.mod found".to_string(),
    })
  }
}

fn parse_module_directive(contents: &str) -> Option<String> {
  contents.lines().find_map(|line| {
    let line = line.split("//").next().unwrap_or_default().trim();
    let rest = line.strip_prefix("module")?;
    if !rest.starts_with(char::is_whitespace) {
      return None;
    }
    let path = rest.trim().trim_matches('"');
    (!path.is_empty()).then(|| path.to_string())
  })
}

/// The package name from a Go source file's package clause.
fn package_name(source: &str) -> Option<&str> {
  let mut in_block_comment = false;
  for line in source.lines() {
    let mut line = line.trim();
    if in_block_comment {
      match line.find("*/") {
        Some(end) => {
          in_block_comment = false;
          line = line[end + 2..].trim();
        }
        None => continue,
      }
    }
    if let Some(rest) = line.strip_prefix("/*") {
      match rest.find("*/") {
        Some(end) => line = rest[end + 2..].trim(),
        None => {
          in_block_comment = true;
          continue;
        }
      }
    }
    if line.is_empty() || line.starts_with("//") {
      continue;
    }
    return line
      .strip_prefix("package")
      .filter(|rest| rest.starts_with(char::is_whitespace))
      .and_then(|rest| rest.split_whitespace().next());
  }
  None
}

/// Join a slash-separated relative path onto `base` without touching the
/// filesystem.
fn lexical_join(base: &Path, rel: &str) -> PathBuf {
  let mut out = base.to_path_buf();
  for component in Path::new(rel).components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

fn slash_path(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join("/")
}

/// The platform an index child is for.
fn entry_platform(entry: &IndexEntry) -> Platform {
  match (&entry.platform, &entry.artifact) {
    (Some(platform), _) => platform.clone(),
    (None, Artifact::Image(image)) => image.platform(),
    (None, Artifact::Index(_)) => Platform::default(),
  }
}

fn ambient_platform(environ: &BTreeMap<String, String>) -> Platform {
  let os = environ.get("GOOS").map(String::as_str).unwrap_or("linux");
  let arch = environ.get("GOARCH").map(String::as_str).unwrap_or("amd64");
  let mut platform = Platform::new(os, arch);
  if arch == "arm"
    && let Some(goarm) = environ.get("GOARM")
  {
    platform = platform.with_variant(&format!("v{}", goarm));
  }
  platform
}

/// Builds Go packages into images on top of base images.
#[derive(Clone)]
pub struct GoBuilder {
  inner: Arc<Inner>,
}

struct Inner {
  config: BuilderConfig,
  working_dir: PathBuf,
  module: GoModule,
  matcher: PlatformMatcher,
  flags: FlagDefaults,
  toolchain: Arc<dyn Toolchain>,
  bases: Arc<dyn BaseSource>,
  base_memo: PromiseMap<String, Artifact, BuildError>,
  sbom: Option<Arc<dyn SbomGenerator>>,
}

impl GoBuilder {
  /// Validate `config` and discover the main module.
  pub fn new(
    config: BuilderConfig,
    toolchain: Arc<dyn Toolchain>,
    bases: Arc<dyn BaseSource>,
    sbom: Option<Arc<dyn SbomGenerator>>,
  ) -> Result<Self, BuildError> {
    let matcher = if config.platforms.is_empty() {
      PlatformMatcher::single(ambient_platform(&config.environ))
    } else {
      if let Some(var) = PLATFORM_ENV.iter().find(|v| config.environ.contains_key(**v)) {
        return Err(BuildError::Config(format!(
          "platforms ({}) cannot be combined with {} in the environment",
          config.platforms.join(","),
          var
        )));
      }
      PlatformMatcher::parse(&config.platforms)?
    };

    for entry in config
      .default_env
      .iter()
      .chain(config.builds.iter().flat_map(|b| b.env.iter()))
    {
      split_env(entry)?;
    }

    let working_dir = dunce::canonicalize(&config.working_dir)?;
    let module = GoModule::discover(&working_dir)?;
    debug!(module = %module.path, dir = %module.dir.display(), "discovered go module");

    let flags = FlagDefaults {
      trimpath: config.trimpath,
      disable_optimizations: config.disable_optimizations,
      flags: config.default_flags.clone(),
      ldflags: config.default_ldflags.clone(),
    };

    Ok(Self {
      inner: Arc::new(Inner {
        config,
        working_dir,
        module,
        matcher,
        flags,
        toolchain,
        bases,
        base_memo: PromiseMap::new(),
        sbom,
      }),
    })
  }

  pub fn module(&self) -> &GoModule {
    &self.inner.module
  }

  pub fn matcher(&self) -> &PlatformMatcher {
    &self.inner.matcher
  }

  /// Base image reference for a qualified import path.
  pub fn base_for(&self, reference: &Reference) -> &str {
    self
      .inner
      .config
      .base_overrides
      .get(reference.path())
      .unwrap_or(&self.inner.config.default_base)
  }
}

impl Inner {
  /// Directory of a qualified package.
  fn package_dir(&self, reference: &Reference) -> Result<PathBuf, BuildError> {
    let path = reference.path();
    if path == self.module.path {
      return Ok(self.module.dir.clone());
    }
    match path
      .strip_prefix(self.module.path.as_str())
      .and_then(|rest| rest.strip_prefix('/'))
    {
      Some(rel) => Ok(lexical_join(&self.module.dir, rel)),
      None => Err(BuildError::OutsideModule {
        reference: reference.to_string(),
        module: self.module.path.clone(),
      }),
    }
  }

  fn build_dir(&self, build: &BuildConfig) -> PathBuf {
    if build.dir.is_empty() {
      self.module.dir.clone()
    } else {
      lexical_join(&self.module.dir, &build.dir)
    }
  }

  async fn fetch_base(&self, base: &str) -> Result<Artifact, BuildError> {
    let source = self.bases.clone();
    let name = base.to_string();
    // Base fetches are shared across batches, so they run detached from any
    // single batch's cancellation. Failed fetches are retried on next use.
    let promise = self.base_memo.get_or_replace(
      name.clone(),
      |existing| existing.is_failed(),
      || {
        Promise::spawn(async move {
          info!(base = %name, "fetching base image");
          source.fetch(&CancellationToken::new(), &name).await
        })
      },
    );
    promise.get().await
  }

  /// Compile and compose one single-platform image.
  async fn build_image(
    self: Arc<Self>,
    ctx: CancellationToken,
    reference: Reference,
    base: Arc<Image>,
    platform: Platform,
  ) -> Result<Image, BuildError> {
    let build = resolve_build_config(&self.config.builds, &self.module.path, reference.path());
    if !build.id.is_empty() {
      debug!(reference = %reference, build = %build.id, "using build configuration");
    }
    let env = build_env(&platform, &self.config.default_env, &build.env, &self.config.environ)?;
    let flags = build_flags(&build, &self.flags, &env)?;

    let windows = platform.is_windows();
    let app_name = reference.app_name();
    let app_file = if windows {
      format!("{}.exe", app_name)
    } else {
      app_name.clone()
    };

    let (out_dir, _scratch) = match &self.config.cache_dir {
      Some(cache) => {
        let dir = cache
          .join(format!("{}-{}", app_name, name_hash(reference.path())))
          .join(platform.slug());
        tokio::fs::create_dir_all(&dir).await?;
        (dir, None)
      }
      None => {
        let temp = tempfile::Builder::new().prefix("kopack-").tempdir()?;
        (temp.path().to_path_buf(), Some(temp))
      }
    };

    let invocation = Invocation {
      reference: reference.clone(),
      dir: self.build_dir(&build),
      platform: platform.clone(),
      env,
      flags,
      output: out_dir.join(&app_file),
    };
    let binary = self.toolchain.compile(&ctx, &invocation).await?;

    let data_root = self.package_dir(&reference)?.join(KODATA_DIR);
    let data_mtime = self
      .config
      .data_creation_time
      .map(|t| t.timestamp().max(0) as u64)
      .unwrap_or(0);
    let layer_path = format!("{}/{}", APP_DIR, app_file);
    let (data_layer, binary_layer) = {
      let binary = binary.clone();
      let platform = platform.clone();
      let layer_path = layer_path.clone();
      tokio::task::spawn_blocking(move || -> Result<_, BuildError> {
        let data = package_data_tree(&data_root, KODATA_ROOT, &platform, data_mtime)?;
        let bin = package_binary(&binary, &layer_path, &platform)?;
        Ok((data, bin))
      })
      .await
      .map_err(|_| BuildError::Abandoned(Abandoned))??
    };

    let sbom = match &self.sbom {
      Some(generator) => {
        let input = SbomInput {
          reference: reference.clone(),
          binary: binary.clone(),
          platform: platform.clone(),
        };
        Some(generator.generate(&ctx, &input).await?)
      }
      None => None,
    };

    let created = self
      .config
      .creation_time
      .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
    let (entrypoint, app_dir, kodata_path, separator) = if windows {
      (
        format!(r"{}\{}", WINDOWS_APP_DIR, app_file),
        WINDOWS_APP_DIR,
        WINDOWS_KODATA_ROOT,
        ';',
      )
    } else {
      (layer_path, APP_DIR, KODATA_ROOT, ':')
    };

    let mut image = (*base).clone();
    image.attachments.clear();
    let layer_media_type = media::layer_for(&image.media_type);
    image.append_layer(
      data_layer.with_media_type(layer_media_type),
      History {
        author: Some(IMAGE_AUTHOR.to_string()),
        created: created.clone(),
        created_by: Some(format!("kopack build {}", reference)),
        comment: Some(format!("kodata contents, at ${}", KO_DATA_PATH_ENV)),
        empty_layer: false,
      },
    );
    image.append_layer(
      binary_layer.with_media_type(layer_media_type),
      History {
        author: Some(IMAGE_AUTHOR.to_string()),
        created: created.clone(),
        created_by: Some(format!("kopack build {}", reference)),
        comment: Some(format!("go build output, at {}", entrypoint)),
        empty_layer: false,
      },
    );

    let config = &mut image.config;
    config.config.entrypoint = Some(vec![entrypoint]);
    config.config.cmd = None;
    config.config.env.push(format!("{}={}", KO_DATA_PATH_ENV, kodata_path));
    config.extend_path(app_dir, separator);
    if windows && config.config.user.as_deref().unwrap_or_default().is_empty() {
      config.config.user = Some(WINDOWS_USER.to_string());
    }
    config
      .config
      .labels
      .extend(self.config.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    config.author = Some(IMAGE_AUTHOR.to_string());
    if created.is_some() {
      config.created = created;
    }

    if let Some((payload, media_type)) = sbom {
      image = image.with_attachment(Attachment {
        name: SBOM_ATTACHMENT.to_string(),
        media_type,
        payload: Arc::new(payload),
      });
    }

    info!(reference = %reference, platform = %platform, digest = %image.digest()?, "built image");
    Ok(image)
  }

  /// Build one image per `(base, platform, annotations)` job, in parallel,
  /// keeping job order in the result.
  async fn build_entries(
    self: &Arc<Self>,
    ctx: &CancellationToken,
    reference: &Reference,
    jobs: Vec<(Arc<Image>, Platform, BTreeMap<String, String>)>,
  ) -> Result<Vec<IndexEntry>, BuildError> {
    let mut set = JoinSet::new();
    let mut annotations = Vec::with_capacity(jobs.len());
    for (position, (base, platform, entry_annotations)) in jobs.into_iter().enumerate() {
      annotations.push((platform.clone(), entry_annotations));
      let inner = self.clone();
      let ctx = ctx.clone();
      let reference = reference.clone();
      set.spawn(async move { (position, inner.build_image(ctx, reference, base, platform).await) });
    }

    let mut built: Vec<Option<Result<Image, BuildError>>> = (0..annotations.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
      match joined {
        Ok((position, result)) => built[position] = Some(result),
        Err(e) => warn!(error = %e, "platform build task panicked"),
      }
    }

    built
      .into_iter()
      .zip(annotations)
      .map(|(result, (platform, annotations))| {
        let image = result.ok_or(BuildError::Abandoned(Abandoned))??;
        Ok(IndexEntry {
          artifact: image.into(),
          platform: Some(platform),
          annotations,
        })
      })
      .collect()
  }

  async fn build_scratch(self: &Arc<Self>, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError> {
    let platforms = match &self.matcher {
      PlatformMatcher::All => return Err(BuildError::ScratchAll),
      PlatformMatcher::Specs(platforms) => platforms.clone(),
    };
    if let [platform] = platforms.as_slice() {
      let base = Arc::new(Image::scratch(platform));
      let image = self
        .clone()
        .build_image(ctx.clone(), reference.clone(), base, platform.clone())
        .await?;
      return Ok(image.into());
    }

    let jobs = platforms
      .into_iter()
      .map(|p| (Arc::new(Image::scratch(&p)), p, BTreeMap::new()))
      .collect();
    let mut index = ImageIndex::new(media::OCI_INDEX);
    index.entries = self.build_entries(ctx, reference, jobs).await?;
    Ok(index.into())
  }

  async fn build_from_index(
    self: &Arc<Self>,
    ctx: &CancellationToken,
    reference: &Reference,
    base_name: &str,
    base: &ImageIndex,
  ) -> Result<Artifact, BuildError> {
    let mut jobs = Vec::new();
    for entry in &base.entries {
      let platform = entry_platform(entry);
      if !self.matcher.matches(&platform) {
        continue;
      }
      let image = match &entry.artifact {
        Artifact::Image(image) => image.clone(),
        Artifact::Index(nested) => {
          return Err(BuildError::UnexpectedNesting {
            base: base_name.to_string(),
            digest: nested.digest()?,
          });
        }
      };
      if !self.matcher.is_multi() {
        let built = self
          .clone()
          .build_image(ctx.clone(), reference.clone(), image, platform)
          .await?;
        return Ok(built.into());
      }
      jobs.push((image, platform, entry.annotations.clone()));
    }

    if jobs.is_empty() {
      return Err(self.no_match(base_name));
    }

    let mut index = ImageIndex::new(&base.media_type);
    index.annotations = base.annotations.clone();
    index.entries = self.build_entries(ctx, reference, jobs).await?;
    Ok(index.into())
  }

  fn no_match(&self, base: &str) -> BuildError {
    let platforms = match &self.matcher {
      PlatformMatcher::All => "all".to_string(),
      PlatformMatcher::Specs(specs) => specs.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
    };
    BuildError::NoMatchingPlatform {
      base: base.to_string(),
      platforms,
    }
  }
}

#[async_trait]
impl Builder for GoBuilder {
  fn qualify_import(&self, reference: &Reference) -> Result<Reference, BuildError> {
    if !reference.is_local() {
      return Ok(reference.to_strict());
    }
    let module = &self.inner.module;
    let joined = lexical_join(&self.inner.working_dir, reference.path());
    let rel = joined
      .strip_prefix(&module.dir)
      .map_err(|_| BuildError::OutsideModule {
        reference: reference.to_string(),
        module: module.path.clone(),
      })?;
    let rel = slash_path(rel);
    let path = if rel.is_empty() {
      module.path.clone()
    } else {
      format!("{}/{}", module.path, rel)
    };
    Ok(Reference::new(path, true))
  }

  fn is_supported_reference(&self, reference: &Reference) -> Result<(), BuildError> {
    let qualified = self.qualify_import(reference)?;
    let dir = self.inner.package_dir(&qualified)?;
    let unsupported = |reason: &str| BuildError::Unsupported {
      reference: qualified.to_string(),
      reason: reason.to_string(),
    };

    let entries = std::fs::read_dir(&dir).map_err(|_| unsupported("no package directory"))?;
    for entry in entries {
      let path = entry?.path();
      let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        continue;
      };
      if !name.ends_with(".go") || name.ends_with("_test.go") || !path.is_file() {
        continue;
      }
      let source = std::fs::read_to_string(&path)?;
      if package_name(&source) == Some("main") {
        return Ok(());
      }
    }
    Err(unsupported("not a main package"))
  }

  async fn build(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Artifact, BuildError> {
    let reference = self.qualify_import(reference)?;
    self.is_supported_reference(&reference)?;
    let base_name = self.base_for(&reference).to_string();
    info!(reference = %reference, base = %base_name, "building");

    if base_name == SCRATCH {
      return self.inner.build_scratch(ctx, &reference).await;
    }

    match self.inner.fetch_base(&base_name).await? {
      Artifact::Image(base) => {
        let platform = base.platform();
        if !self.inner.matcher.matches(&platform) {
          return Err(self.inner.no_match(&base_name));
        }
        let image = self
          .inner
          .clone()
          .build_image(ctx.clone(), reference, base, platform)
          .await?;
        Ok(image.into())
      }
      Artifact::Index(index) => {
        self
          .inner
          .build_from_index(ctx, &reference, &base_name, &index)
          .await
      }
    }
  }
}
