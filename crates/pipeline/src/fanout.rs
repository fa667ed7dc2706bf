//! Image fan-out: one row in, one row out with its output references
//! filled.
//!
//! Every source reference of a row becomes an independent task. Tasks
//! acquire a permit from a limiter shared by the whole process before
//! touching the transform stage, so the number of in-flight transforms
//! never exceeds the limiter's capacity no matter how many rows or jobs
//! are running. A failing image is logged, counted, and reported on the
//! event bus; it never cancels its siblings.

use std::sync::Arc;

use futures::future::join_all;
use imgpipe_core::manifest::Row;
use imgpipe_core::naming::artifact_key;
use imgpipe_core::types::JobId;
use imgpipe_events::bus::{EventBus, JobEvent, EVENT_IMAGE_FAILED};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::transform::{ImageErrorKind, ImageTransform};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of one image task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImageOutcome {
    Published { output: String },
    Failed { kind: ImageErrorKind, message: String },
}

/// Per-row tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum FanOutError {
    /// An image task panicked or was cancelled.
    #[error("Image task for row {row_index} aborted: {source}")]
    TaskAborted {
        row_index: usize,
        #[source]
        source: JoinError,
    },

    #[error("Concurrency limiter closed")]
    LimiterClosed,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct ImageFanOut {
    transform: Arc<dyn ImageTransform>,
    limiter: Arc<Semaphore>,
    events: Arc<EventBus>,
}

impl ImageFanOut {
    pub fn new(
        transform: Arc<dyn ImageTransform>,
        limiter: Arc<Semaphore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            transform,
            limiter,
            events,
        }
    }

    /// Run every image of `row` through the transform stage and fill
    /// `output_image_refs` with the published locators, in input order.
    ///
    /// Failed images contribute nothing to the output list. A row without
    /// inputs gets an empty list and no transform is invoked. When a task
    /// aborts, the remaining outcomes are still logged and reported before
    /// the first abort is returned.
    pub async fn process_row(
        &self,
        job_id: &JobId,
        row_index: usize,
        mut row: Row,
    ) -> Result<(Row, RowStats), FanOutError> {
        if row.input_image_refs.is_empty() {
            tracing::debug!(job_id = %job_id, row_index, "Row has no input images");
            row.output_image_refs = Some(Vec::new());
            return Ok((row, RowStats::default()));
        }

        let handles: Vec<_> = row
            .input_image_refs
            .iter()
            .map(|source| {
                let transform = Arc::clone(&self.transform);
                let limiter = Arc::clone(&self.limiter);
                let source = source.clone();
                let key = artifact_key(job_id, row_index, &source);

                tokio::spawn(async move {
                    let _permit = limiter.acquire_owned().await.ok()?;
                    let outcome = match transform.transform(&source, &key).await {
                        Ok(output) => ImageOutcome::Published { output },
                        Err(e) => ImageOutcome::Failed {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    };
                    Some(outcome)
                })
            })
            .collect();

        let mut stats = RowStats {
            attempted: handles.len(),
            ..Default::default()
        };
        let mut outputs = Vec::with_capacity(handles.len());
        let mut aborted = None;

        for (joined, source) in join_all(handles).await.into_iter().zip(&row.input_image_refs) {
            let outcome = match joined {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    aborted.get_or_insert(FanOutError::LimiterClosed);
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        row_index,
                        source = %source,
                        error = %e,
                        "Image task aborted",
                    );
                    aborted.get_or_insert(FanOutError::TaskAborted { row_index, source: e });
                    continue;
                }
            };

            match outcome {
                ImageOutcome::Published { output } => {
                    stats.succeeded += 1;
                    outputs.push(output);
                }
                ImageOutcome::Failed { kind, message } => {
                    stats.failed += 1;
                    tracing::warn!(
                        job_id = %job_id,
                        row_index,
                        source = %source,
                        kind = kind.as_str(),
                        error = %message,
                        "Image failed",
                    );
                    self.events.publish(
                        JobEvent::new(EVENT_IMAGE_FAILED, job_id.clone()).with_payload(
                            serde_json::json!({
                                "row_index": row_index,
                                "source": source,
                                "kind": kind,
                                "message": message,
                            }),
                        ),
                    );
                }
            }
        }

        if let Some(err) = aborted {
            return Err(err);
        }

        tracing::debug!(
            job_id = %job_id,
            row_index,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Row processed",
        );

        row.output_image_refs = Some(outputs);
        Ok((row, stats))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
