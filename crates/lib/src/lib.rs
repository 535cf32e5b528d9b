//! kopack-lib: Core types and logic for kopack
//!
//! This crate turns Go import paths into published container images and
//! rewrites YAML documents to point at them:
//! - `build`: deterministic image builds on top of a base image
//! - `cache`: single-execution promises memoizing builds and publishes
//! - `publish`: the destinations images are written to
//! - `resolve`: finding references in documents and substituting digests

pub mod build;
pub mod cache;
pub mod config;
pub mod consts;
pub mod image;
pub mod platform;
pub mod publish;
pub mod reference;
pub mod resolve;
pub mod util;
