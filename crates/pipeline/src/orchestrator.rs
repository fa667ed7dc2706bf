//! Job orchestration.
//!
//! [`JobOrchestrator::submit`] creates a `Pending` record and returns the
//! new job id at once; the pipeline then runs as a tracked background task:
//!
//! 1. Decode the manifest. A decode failure fails the job.
//! 2. Pass every row through the [`ImageFanOut`], several rows at a time.
//! 3. Encode the enriched manifest and publish it at `{job_id}/output.csv`.
//! 4. Record `Completed` (or `Failed`) together with `completed_at`.
//!
//! Per-image failures never reach the job status; only manifest-level and
//! internal failures do.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use imgpipe_core::error::CoreError;
use imgpipe_core::manifest::{self, ManifestColumns, ManifestError};
use imgpipe_core::naming::result_manifest_key;
use imgpipe_core::types::JobId;
use imgpipe_db::{JobRecord, JobStatus, StatusRepository};
use imgpipe_events::bus::{
    EventBus, JobEvent, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_SUBMITTED,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::config::PipelineConfig;
use crate::fanout::{FanOutError, ImageFanOut};
use crate::fetch::HttpFetcher;
use crate::publish::{LocalPublisher, Publisher};
use crate::transform::{FetchResizePublish, ImageTransform};

// ---------------------------------------------------------------------------
// Error / report
// ---------------------------------------------------------------------------

/// Failures that abort a whole job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed manifest: {0}")]
    MalformedManifest(#[source] ManifestError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FanOutError> for PipelineError {
    fn from(err: FanOutError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// Summary of one finished job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub rows: usize,
    pub images_total: usize,
    pub images_succeeded: usize,
    pub images_failed: usize,
    pub rows_without_inputs: usize,
    /// Locator of the published result manifest.
    pub result_manifest: Option<String>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Admits jobs and drives them to a terminal status in the background.
pub struct JobOrchestrator {
    runner: JobRunner,
    tracker: TaskTracker,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator").finish_non_exhaustive()
    }
}

/// Everything a background run needs, cheap to clone into each task.
#[derive(Clone)]
struct JobRunner {
    repo: Arc<dyn StatusRepository>,
    fanout: Arc<ImageFanOut>,
    publisher: Arc<dyn Publisher>,
    events: Arc<EventBus>,
    columns: ManifestColumns,
    row_concurrency: usize,
}

impl JobOrchestrator {
    /// Assemble an orchestrator from explicit collaborators.
    ///
    /// `max_concurrent_images` sizes the limiter shared by every job this
    /// orchestrator runs.
    pub fn new(
        repo: Arc<dyn StatusRepository>,
        events: Arc<EventBus>,
        transform: Arc<dyn ImageTransform>,
        publisher: Arc<dyn Publisher>,
        columns: ManifestColumns,
        max_concurrent_images: usize,
    ) -> Self {
        let bound = max_concurrent_images.max(1);
        let limiter = Arc::new(Semaphore::new(bound));
        let fanout = Arc::new(ImageFanOut::new(transform, limiter, Arc::clone(&events)));

        Self {
            runner: JobRunner {
                repo,
                fanout,
                publisher,
                events,
                columns,
                row_concurrency: bound,
            },
            tracker: TaskTracker::new(),
        }
    }

    /// Wire the production stage (HTTP fetch, local publish) from config.
    pub fn from_config(
        config: &PipelineConfig,
        repo: Arc<dyn StatusRepository>,
        events: Arc<EventBus>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let publisher: Arc<dyn Publisher> = Arc::new(LocalPublisher::new(
            config.output_dir.clone(),
            config.public_base_url.clone(),
        ));
        let transform = Arc::new(FetchResizePublish::new(
            Arc::new(HttpFetcher::new(config.fetch_timeout(), config.max_source_bytes)),
            Arc::clone(&publisher),
            config.resize_spec(),
        ));

        Ok(Self::new(
            repo,
            events,
            transform,
            publisher,
            config.columns.clone(),
            config.max_concurrent_images,
        ))
    }

    /// Admit a manifest. Returns as soon as the `Pending` record exists;
    /// decoding and processing happen in the background.
    pub async fn submit(&self, manifest_bytes: Vec<u8>) -> Result<JobId, CoreError> {
        let job_id = JobId::generate();
        self.runner.repo.create(&job_id).await?;

        tracing::info!(job_id = %job_id, bytes = manifest_bytes.len(), "Job submitted");
        self.runner.events.publish(
            JobEvent::new(EVENT_JOB_SUBMITTED, job_id.clone())
                .with_payload(serde_json::json!({ "bytes": manifest_bytes.len() })),
        );

        let runner = self.runner.clone();
        let id = job_id.clone();
        self.tracker.spawn(async move { runner.run(id, manifest_bytes).await });

        Ok(job_id)
    }

    /// Current status projection, `None` for an unknown id.
    pub async fn query(&self, job_id: &JobId) -> Option<JobRecord> {
        self.runner.repo.get(job_id).await
    }

    /// Bytes of the result manifest of a `Completed` job.
    pub async fn result_manifest(&self, job_id: &JobId) -> Result<Vec<u8>, CoreError> {
        let record = self.query(job_id).await.ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

        if record.status != JobStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is {}, result manifest unavailable",
                record.status
            )));
        }

        let key = result_manifest_key(job_id);
        self.runner
            .publisher
            .read(&key)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Result manifest",
                id: job_id.to_string(),
            })
    }

    /// Number of jobs whose background run has not finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop tracking new work and wait up to `timeout` for in-flight jobs.
    ///
    /// Returns `true` if every job finished within the window.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if drained {
            tracing::info!("All in-flight jobs finished");
        } else {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "Shutdown window elapsed with jobs still running"
            );
        }
        drained
    }
}

// ---------------------------------------------------------------------------
// Background run
// ---------------------------------------------------------------------------

impl JobRunner {
    async fn run(self, job_id: JobId, raw: Vec<u8>) {
        // Run the pipeline in its own task so a panic surfaces as a
        // JoinError and the job still reaches a terminal status.
        let handle = {
            let runner = self.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { runner.execute(&job_id, &raw).await })
        };

        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Internal(format!("job task aborted: {e}"))),
        };

        self.finish(&job_id, outcome).await;
    }

    async fn execute(&self, job_id: &JobId, raw: &[u8]) -> Result<JobReport, PipelineError> {
        let mut manifest =
            manifest::decode(raw, &self.columns).map_err(PipelineError::MalformedManifest)?;

        if !manifest.has_input_column() {
            tracing::warn!(
                job_id = %job_id,
                column = %self.columns.input,
                "Manifest has no input image column"
            );
        }

        let rows = manifest.take_rows();
        let mut report = JobReport {
            rows: rows.len(),
            ..Default::default()
        };

        let processed: Vec<_> = stream::iter(rows.into_iter().enumerate())
            .map(|(row_index, row)| {
                let fanout = Arc::clone(&self.fanout);
                let job_id = job_id.clone();
                async move { fanout.process_row(&job_id, row_index, row).await }
            })
            .buffered(self.row_concurrency)
            .collect()
            .await;

        let mut rows = Vec::with_capacity(processed.len());
        for result in processed {
            let (row, stats) = result?;
            if stats.attempted == 0 {
                report.rows_without_inputs += 1;
            }
            report.images_total += stats.attempted;
            report.images_succeeded += stats.succeeded;
            report.images_failed += stats.failed;
            rows.push(row);
        }
        manifest.set_rows(rows);

        let encoded = manifest::encode(&manifest)
            .map_err(|e| PipelineError::Internal(format!("encode result manifest: {e}")))?;
        let locator = self
            .publisher
            .publish(&result_manifest_key(job_id), &encoded)
            .await
            .map_err(|e| PipelineError::Internal(format!("publish result manifest: {e}")))?;
        report.result_manifest = Some(locator);

        Ok(report)
    }

    async fn finish(&self, job_id: &JobId, outcome: Result<JobReport, PipelineError>) {
        let (status, event) = match outcome {
            Ok(report) => {
                tracing::info!(
                    job_id = %job_id,
                    rows = report.rows,
                    images_total = report.images_total,
                    images_succeeded = report.images_succeeded,
                    images_failed = report.images_failed,
                    "Job completed",
                );
                let payload = serde_json::to_value(&report).unwrap_or_default();
                (
                    JobStatus::Completed,
                    JobEvent::new(EVENT_JOB_COMPLETED, job_id.clone()).with_payload(payload),
                )
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job failed");
                (
                    JobStatus::Failed,
                    JobEvent::new(EVENT_JOB_FAILED, job_id.clone())
                        .with_payload(serde_json::json!({ "error": e.to_string() })),
                )
            }
        };

        if let Err(e) = self
            .repo
            .set_status(job_id, status, Some(Utc::now()))
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record final job status");
            return;
        }
        self.events.publish(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
