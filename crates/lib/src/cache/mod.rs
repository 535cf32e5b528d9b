//! Memoizing build and publish results.
//!
//! Both caches are maps from reference to [`Promise`], so every concurrent
//! request for the same reference shares a single computation. Entries live
//! until explicitly invalidated; watch mode is the only caller that does.
//!
//! # Submodules
//!
//! - [`promise`] - Single-execution memo cells and the keyed map over them
//! - [`build`] - Memoized builder
//! - [`publish`] - Memoized publisher

pub mod build;
pub mod promise;
pub mod publish;

pub use build::BuildCache;
pub use promise::{Abandoned, Promise, PromiseMap};
pub use publish::PublishCache;
