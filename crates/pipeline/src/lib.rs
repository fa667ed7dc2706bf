//! Asynchronous image batch pipeline.
//!
//! A submitted manifest becomes a job that runs in the background: every
//! source image is fetched, resized, recompressed and published under a
//! bounded concurrency limit, and the enriched manifest is published next
//! to the images. Progress is observable through the status repository
//! and the event bus.
//!
//! - [`config`]: environment-driven [`PipelineConfig`]
//! - [`fetch`]: source URI validation and HTTP retrieval
//! - [`publish`]: artifact storage
//! - [`transform`]: fetch + resize/recompress + publish for one image
//! - [`fanout`]: one row's images under the shared concurrency limit
//! - [`orchestrator`]: job admission, background runs, shutdown

pub mod config;
pub mod fanout;
pub mod fetch;
pub mod orchestrator;
pub mod publish;
pub mod transform;

pub use config::PipelineConfig;
pub use orchestrator::{JobOrchestrator, JobReport, PipelineError};
