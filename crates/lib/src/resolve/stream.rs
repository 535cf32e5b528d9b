//! Resolving a stream of files with ordered output.
//!
//! Files are resolved concurrently, but output is written strictly in the
//! order the files were submitted: each submission gets a oneshot receiver in
//! a FIFO queue and only the head of the queue is awaited.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::Value;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use super::ResolveError;
use super::engine::{ResolveOptions, resolve_with_references};
use super::watch::DependencyGraph;
use crate::build::Builder;
use crate::publish::Publisher;
use crate::reference::Reference;

/// Path that reads documents from standard input.
pub const STDIN_PATH: &str = "-";

/// Extensions picked up when a directory is given.
const YAML_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// How the stream reacts to a failed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// The first failure in submission order cancels the batch and is returned.
  FailFast,
  /// Failures are logged and the stream keeps going.
  Watch,
}

/// The outcome of resolving one file.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
  pub path: PathBuf,
  /// Re-encoded documents, `---` separated.
  pub output: String,
  /// Canonical references the file contained.
  pub references: BTreeSet<Reference>,
}

/// Resolves files against a shared builder and publisher.
#[derive(Clone)]
pub struct FileResolver {
  builder: Arc<dyn Builder>,
  publisher: Arc<dyn Publisher>,
  options: ResolveOptions,
  graph: Option<Arc<DependencyGraph>>,
}

impl FileResolver {
  pub fn new(builder: Arc<dyn Builder>, publisher: Arc<dyn Publisher>, options: ResolveOptions) -> Self {
    Self {
      builder,
      publisher,
      options,
      graph: None,
    }
  }

  /// Record each successfully resolved file's references in `graph`.
  pub fn with_graph(mut self, graph: Arc<DependencyGraph>) -> Self {
    self.graph = Some(graph);
    self
  }

  /// Read, resolve and re-encode one file.
  pub async fn resolve_file(&self, ctx: &CancellationToken, path: &Path) -> Result<ResolvedFile, ResolveError> {
    let shown = path.display().to_string();
    let text = if path == Path::new(STDIN_PATH) {
      let mut text = String::new();
      tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .map_err(|e| ResolveError::io(&shown, e))?;
      text
    } else {
      tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ResolveError::io(&shown, e))?
    };

    let docs = parse_documents(&shown, &text)?;
    debug!(path = %shown, documents = docs.len(), "resolving file");
    let (docs, references) = resolve_with_references(
      ctx,
      docs,
      self.builder.clone(),
      self.publisher.clone(),
      &self.options,
    )
    .await?;

    Ok(ResolvedFile {
      path: path.to_path_buf(),
      output: encode_documents(&shown, &docs)?,
      references,
    })
  }

  /// Resolve every path received on `input`, writing results to `out` in
  /// submission order. Returns when `input` is closed and every submitted
  /// file has been written.
  ///
  /// Per-file tasks never outlive the call: on failure or cancellation the
  /// batch is cancelled and every task is drained before returning.
  pub async fn run<W>(
    &self,
    ctx: &CancellationToken,
    input: mpsc::Receiver<PathBuf>,
    out: &mut W,
    mode: Mode,
  ) -> Result<(), ResolveError>
  where
    W: AsyncWrite + Unpin + Send,
  {
    let batch = ctx.child_token();
    let mut tasks = JoinSet::new();
    let result = self.pump(ctx, &batch, &mut tasks, input, out, mode).await;
    if result.is_err() {
      batch.cancel();
    }
    while let Some(joined) = tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "file task panicked");
      }
    }
    result
  }

  async fn pump<W>(
    &self,
    ctx: &CancellationToken,
    batch: &CancellationToken,
    tasks: &mut JoinSet<()>,
    mut input: mpsc::Receiver<PathBuf>,
    out: &mut W,
    mode: Mode,
  ) -> Result<(), ResolveError>
  where
    W: AsyncWrite + Unpin + Send,
  {
    let mut queue: VecDeque<(PathBuf, Pending)> = VecDeque::new();
    let mut input_open = true;
    let mut written = 0usize;

    while input_open || !queue.is_empty() {
      tokio::select! {
        _ = ctx.cancelled() => return Err(ResolveError::Cancelled),
        received = input.recv(), if input_open => match received {
          Some(path) => {
            debug!(path = %path.display(), "submitted");
            let (tx, rx) = oneshot::channel();
            let resolver = self.clone();
            let token = batch.clone();
            let submitted = path.clone();
            tasks.spawn(async move {
              let _ = tx.send(resolver.resolve_file(&token, &submitted).await);
            });
            queue.push_back((path, rx));
          }
          None => input_open = false,
        },
        Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
          if let Err(e) = joined {
            error!(error = %e, "file task panicked");
          }
        }
        result = head(&mut queue), if !queue.is_empty() => {
          let Some((path, _)) = queue.pop_front() else {
            continue;
          };
          let result = result.unwrap_or_else(|_| Err(ResolveError::Task(format!("resolution of {} ended early", path.display()))));
          match result {
            Ok(resolved) => {
              if written > 0 {
                out.write_all(b"---\n").await.map_err(|e| ResolveError::io("output", e))?;
              }
              out.write_all(resolved.output.as_bytes()).await.map_err(|e| ResolveError::io("output", e))?;
              out.flush().await.map_err(|e| ResolveError::io("output", e))?;
              written += 1;
              if let Some(graph) = &self.graph {
                graph.record(&resolved.path, resolved.references.iter().cloned());
              }
              info!(path = %path.display(), references = resolved.references.len(), "wrote resolved file");
            }
            Err(e) => match mode {
              Mode::FailFast => return Err(e),
              Mode::Watch => error!(path = %path.display(), error = %e, "failed to resolve file"),
            },
          }
        }
      }
    }
    Ok(())
  }
}

type Pending = oneshot::Receiver<Result<ResolvedFile, ResolveError>>;

/// Wait on the front of the queue only.
async fn head(queue: &mut VecDeque<(PathBuf, Pending)>) -> Result<Result<ResolvedFile, ResolveError>, oneshot::error::RecvError> {
  match queue.front_mut() {
    Some((_, rx)) => rx.await,
    None => std::future::pending().await,
  }
}

/// Split a YAML stream into documents, dropping empty ones.
pub fn parse_documents(path: &str, text: &str) -> Result<Vec<Value>, ResolveError> {
  let mut docs = Vec::new();
  for document in serde_yaml::Deserializer::from_str(text) {
    let value = Value::deserialize(document).map_err(|e| ResolveError::Yaml {
      path: path.to_string(),
      message: e.to_string(),
    })?;
    if !value.is_null() {
      docs.push(value);
    }
  }
  Ok(docs)
}

/// Encode documents as one `---` separated YAML stream.
pub fn encode_documents(path: &str, docs: &[Value]) -> Result<String, ResolveError> {
  let mut encoded = Vec::with_capacity(docs.len());
  for doc in docs {
    encoded.push(serde_yaml::to_string(doc).map_err(|e| ResolveError::Yaml {
      path: path.to_string(),
      message: e.to_string(),
    })?);
  }
  Ok(encoded.join("---\n"))
}

/// Expand directories into the YAML and JSON files they contain, in file-name
/// order. `-` and plain files pass through.
pub fn enumerate_inputs(paths: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>, ResolveError> {
  let mut files = Vec::new();
  for path in paths {
    if path == Path::new(STDIN_PATH) {
      files.push(path.clone());
      continue;
    }
    let metadata = std::fs::metadata(path).map_err(|e| ResolveError::io(path.display().to_string(), e))?;
    if !metadata.is_dir() {
      files.push(path.clone());
      continue;
    }

    let mut walker = WalkDir::new(path).min_depth(1).sort_by_file_name();
    if !recursive {
      walker = walker.max_depth(1);
    }
    for entry in walker {
      let entry = entry.map_err(|e| {
        let message = e.to_string();
        ResolveError::io(
          path.display().to_string(),
          e.into_io_error().unwrap_or_else(|| std::io::Error::other(message)),
        )
      })?;
      let is_yaml = entry
        .path()
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| YAML_EXTENSIONS.contains(&e));
      if entry.file_type().is_file() && is_yaml {
        files.push(entry.into_path());
      }
    }
  }
  Ok(files)
}
