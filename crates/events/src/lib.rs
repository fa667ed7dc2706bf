//! In-process event bus for job lifecycle notifications.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`JobEvent`]: the event envelope.
//!
//! The pipeline publishes `job.submitted`, `image.failed`, `job.completed`
//! and `job.failed`; subscribers are free to count, log, or forward them.

pub mod bus;

pub use bus::{EventBus, JobEvent};
