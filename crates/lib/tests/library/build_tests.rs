use std::sync::Arc;

use chrono::{TimeZone, Utc};
use kopack_lib::build::layer::package_data_tree;
use kopack_lib::build::{BaseSource, BuildError, Builder, BuilderConfig, GoBuilder, RegistryBase, StaticBase};
use kopack_lib::consts::SCRATCH;
use kopack_lib::image::{Artifact, Image};
use kopack_lib::platform::Platform;
use kopack_lib::publish::{MemoryRegistry, RegistryClient};
use kopack_lib::reference::Reference;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::common::{EchoToolchain, write_module};

const MODULE: &str = "example.com/shop";

fn project() -> TempDir {
  let temp = TempDir::new().unwrap();
  write_module(temp.path(), MODULE, &["cmd/api", "cmd/worker"]);
  let data = temp.path().join("cmd/api/kodata");
  std::fs::create_dir_all(data.join("static")).unwrap();
  std::fs::write(data.join("index.html"), "<h1>shop</h1>").unwrap();
  std::fs::write(data.join("static/app.css"), "body {}").unwrap();
  temp
}

fn builder(dir: &std::path::Path, base: &str, platforms: &[&str]) -> GoBuilder {
  let base_image = Image::scratch(&Platform::default_target());
  builder_with(dir, base, platforms, Arc::new(StaticBase::new().with("base", base_image)))
}

fn builder_with(dir: &std::path::Path, base: &str, platforms: &[&str], bases: Arc<dyn BaseSource>) -> GoBuilder {
  let config = BuilderConfig {
    working_dir: dir.to_path_buf(),
    default_base: base.to_string(),
    platforms: platforms.iter().map(|p| p.to_string()).collect(),
    creation_time: Some(Utc.timestamp_opt(1_600_000_000, 0).unwrap()),
    data_creation_time: Some(Utc.timestamp_opt(1_600_000_000, 0).unwrap()),
    ..Default::default()
  };
  GoBuilder::new(config, Arc::new(EchoToolchain), bases, None).unwrap()
}

#[tokio::test]
async fn independent_builds_have_identical_digests() {
  let first_project = project();
  let second_project = project();
  let ctx = CancellationToken::new();
  let reference = Reference::parse("ko://example.com/shop/cmd/api");

  let first = builder(first_project.path(), "base", &[]).build(&ctx, &reference).await.unwrap();
  let second = builder(second_project.path(), "base", &[]).build(&ctx, &reference).await.unwrap();

  assert_eq!(first.digest().unwrap(), second.digest().unwrap());
}

#[tokio::test]
async fn different_packages_differ() {
  let p = project();
  let b = builder(p.path(), "base", &[]);
  let ctx = CancellationToken::new();
  let api = b.build(&ctx, &Reference::parse("./cmd/api")).await.unwrap();
  let worker = b.build(&ctx, &Reference::parse("./cmd/worker")).await.unwrap();
  assert_ne!(api.digest().unwrap(), worker.digest().unwrap());
}

#[tokio::test]
async fn source_change_changes_digest() {
  let p = project();
  let ctx = CancellationToken::new();
  let reference = Reference::parse("./cmd/api");
  let before = builder(p.path(), "base", &[]).build(&ctx, &reference).await.unwrap();
  std::fs::write(p.path().join("cmd/api/kodata/index.html"), "<h1>changed</h1>").unwrap();
  let after = builder(p.path(), "base", &[]).build(&ctx, &reference).await.unwrap();
  assert_ne!(before.digest().unwrap(), after.digest().unwrap());
}

#[tokio::test]
async fn scratch_multi_platform_index_is_deterministic() {
  let p = project();
  let ctx = CancellationToken::new();
  let reference = Reference::parse("./cmd/api");
  let platforms = ["linux/amd64", "linux/arm/v7", "windows/amd64"];

  let a = builder(p.path(), SCRATCH, &platforms).build(&ctx, &reference).await.unwrap();
  let b = builder(p.path(), SCRATCH, &platforms).build(&ctx, &reference).await.unwrap();

  let Artifact::Index(index) = &a else {
    panic!("expected an index");
  };
  assert_eq!(index.entries.len(), 3);
  assert_eq!(a.digest().unwrap(), b.digest().unwrap());
}

#[test]
fn data_layers_depend_only_on_content() {
  let first = project();
  let second = project();
  let platform = Platform::default_target();

  let a = package_data_tree(&first.path().join("cmd/api/kodata"), "/var/run/ko", &platform, 0).unwrap();
  let b = package_data_tree(&second.path().join("cmd/api/kodata"), "/var/run/ko", &platform, 0).unwrap();
  assert_eq!(a.digest, b.digest);
  assert_eq!(a.diff_id, b.diff_id);

  let later = package_data_tree(&first.path().join("cmd/api/kodata"), "/var/run/ko", &platform, 60).unwrap();
  assert_ne!(a.digest, later.digest);
}

#[tokio::test]
async fn bases_pulled_from_a_registry_build_like_local_ones() {
  let p = project();
  let ctx = CancellationToken::new();
  let reference = Reference::parse("./cmd/api");
  let registry = Arc::new(MemoryRegistry::new());
  let base = Artifact::from(Image::scratch(&Platform::default_target()));
  registry.write(&ctx, "registry.example/base:v1", &base).await.unwrap();

  let bases = Arc::new(RegistryBase::new(registry));
  let pulled = builder_with(p.path(), "registry.example/base:v1", &[], bases.clone())
    .build(&ctx, &reference)
    .await
    .unwrap();
  let local = builder(p.path(), "base", &[]).build(&ctx, &reference).await.unwrap();
  assert_eq!(pulled.digest().unwrap(), local.digest().unwrap());

  let err = builder_with(p.path(), "registry.example/missing:v1", &[], bases)
    .build(&ctx, &reference)
    .await
    .unwrap_err();
  assert!(matches!(err, BuildError::Base { .. }));
}
