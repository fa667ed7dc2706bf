use std::sync::Arc;

use imgpipe_pipeline::JobOrchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Job admission, status queries, and result manifests.
    pub orchestrator: Arc<JobOrchestrator>,
}
