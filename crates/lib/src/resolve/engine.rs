//! Resolving one set of documents.
//!
//! Resolution runs in four steps:
//!
//! 1. Drop documents the selector rejects
//! 2. Walk the rest and group node locations by canonical reference
//! 3. Build and publish every unique reference concurrently
//! 4. Write each published digest reference into every node that named it
//!
//! Because step 3 runs once per unique reference, every occurrence of a
//! reference receives the same string.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_yaml::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::selector::Selector;
use super::walker::{NodePath, find, node_mut};
use super::ResolveError;
use crate::build::Builder;
use crate::publish::Publisher;
use crate::reference::Reference;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
  /// Only `ko://` strings are references, and each must be buildable.
  pub strict: bool,
  pub selector: Option<Selector>,
}

/// Node locations per canonical reference, as `(document index, path)`.
pub type Occurrences = BTreeMap<Reference, Vec<(usize, NodePath)>>;

/// Find every reference in `docs`.
///
/// In strict mode an unsupported reference fails the whole set; otherwise it
/// is skipped.
pub fn collect_references(docs: &[Value], builder: &dyn Builder, strict: bool) -> Result<Occurrences, ResolveError> {
  let mut occurrences = Occurrences::new();
  for (index, doc) in docs.iter().enumerate() {
    for found in find(doc, strict) {
      if let Err(e) = builder.is_supported_reference(&found.reference) {
        if strict {
          return Err(ResolveError::Unsupported {
            reference: found.reference.to_string(),
            source: e,
          });
        }
        trace!(value = found.value(), "not a buildable reference");
        continue;
      }
      let canonical = match builder.qualify_import(&found.reference) {
        Ok(canonical) => canonical,
        Err(e) if strict => {
          return Err(ResolveError::Unsupported {
            reference: found.reference.to_string(),
            source: e,
          });
        }
        Err(_) => found.reference.clone(),
      };
      occurrences.entry(canonical).or_default().push((index, found.path));
    }
  }
  Ok(occurrences)
}

/// Resolve `docs`, returning the rewritten documents.
pub async fn resolve_documents(
  ctx: &CancellationToken,
  docs: Vec<Value>,
  builder: Arc<dyn Builder>,
  publisher: Arc<dyn Publisher>,
  options: &ResolveOptions,
) -> Result<Vec<Value>, ResolveError> {
  resolve_with_references(ctx, docs, builder, publisher, options)
    .await
    .map(|(docs, _)| docs)
}

/// Like [`resolve_documents`], also returning the canonical references that
/// were resolved.
pub async fn resolve_with_references(
  ctx: &CancellationToken,
  docs: Vec<Value>,
  builder: Arc<dyn Builder>,
  publisher: Arc<dyn Publisher>,
  options: &ResolveOptions,
) -> Result<(Vec<Value>, BTreeSet<Reference>), ResolveError> {
  if ctx.is_cancelled() {
    return Err(ResolveError::Cancelled);
  }

  let mut docs: Vec<Value> = match &options.selector {
    Some(selector) => docs.into_iter().filter(|d| selector.matches_document(d)).collect(),
    None => docs,
  };

  let occurrences = collect_references(&docs, builder.as_ref(), options.strict)?;
  debug!(documents = docs.len(), references = occurrences.len(), "collected references");

  let batch = ctx.child_token();
  let mut join_set = JoinSet::new();
  for reference in occurrences.keys().cloned() {
    let builder = builder.clone();
    let publisher = publisher.clone();
    let batch = batch.clone();

    join_set.spawn(async move {
      let result = build_and_publish(&batch, builder.as_ref(), publisher.as_ref(), &reference).await;
      if result.is_err() {
        batch.cancel();
      }
      (reference, result)
    });
  }

  let mut resolved: HashMap<Reference, String> = HashMap::new();
  let mut first_error = None;
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((reference, Ok(published))) => {
        info!(reference = %reference, published = %published, "resolved");
        resolved.insert(reference, published);
      }
      Ok((reference, Err(e))) => {
        if e.is_cancelled() {
          debug!(reference = %reference, "resolution cancelled");
        } else {
          error!(reference = %reference, error = %e, "failed to resolve");
        }
        keep_root_cause(&mut first_error, e);
      }
      Err(e) => {
        error!(error = %e, "resolve task panicked");
        batch.cancel();
        keep_root_cause(&mut first_error, ResolveError::Task(e.to_string()));
      }
    }
  }
  if let Some(e) = first_error {
    return Err(e);
  }

  for (reference, nodes) in &occurrences {
    let Some(published) = resolved.get(reference) else {
      continue;
    };
    for (index, path) in nodes {
      if let Some(node) = docs.get_mut(*index).and_then(|d| node_mut(d, path)) {
        *node = Value::String(published.clone());
      }
    }
  }

  Ok((docs, occurrences.into_keys().collect()))
}

/// Keep the first failure that is not a cancellation; a cancellation is kept
/// only until a real failure shows up.
fn keep_root_cause(first: &mut Option<ResolveError>, error: ResolveError) {
  let replace = match first.as_ref() {
    Some(existing) => existing.is_cancelled() && !error.is_cancelled(),
    None => true,
  };
  if replace {
    *first = Some(error);
  }
}

async fn build_and_publish(
  ctx: &CancellationToken,
  builder: &dyn Builder,
  publisher: &dyn Publisher,
  reference: &Reference,
) -> Result<String, ResolveError> {
  let artifact = builder
    .build(ctx, reference)
    .await
    .map_err(|source| ResolveError::Build {
      reference: reference.to_string(),
      source,
    })?;
  if ctx.is_cancelled() {
    return Err(ResolveError::Cancelled);
  }
  publisher
    .publish(ctx, &artifact, reference)
    .await
    .map_err(|source| ResolveError::Publish {
      reference: reference.to_string(),
      source,
    })
}
