//! Shared building blocks for the image batch pipeline.
//!
//! - [`error::CoreError`]: domain error shared by every crate.
//! - [`types`]: job identifiers and timestamps.
//! - [`manifest`]: the CSV manifest codec.
//! - [`naming`]: deterministic artifact keys.

pub mod error;
pub mod manifest;
pub mod naming;
pub mod types;
