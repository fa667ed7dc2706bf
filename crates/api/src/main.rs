use std::net::SocketAddr;
use std::sync::Arc;

use imgpipe_db::InMemoryStatusRepo;
use imgpipe_events::EventBus;
use imgpipe_pipeline::{JobOrchestrator, PipelineConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imgpipe_api::config::ServerConfig;
use imgpipe_api::router::build_app_router;
use imgpipe_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "imgpipe_api=debug,imgpipe_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline_config = PipelineConfig::from_env();
    tracing::info!(
        output_dir = %pipeline_config.output_dir.display(),
        max_concurrent_images = pipeline_config.max_concurrent_images,
        target_width = pipeline_config.target_width,
        jpeg_quality = pipeline_config.jpeg_quality,
        "Loaded pipeline configuration"
    );

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let event_log_handle = tokio::spawn(log_events(event_bus.subscribe()));

    // --- Pipeline ---
    let orchestrator = Arc::new(
        JobOrchestrator::from_config(
            &pipeline_config,
            Arc::new(InMemoryStatusRepo::new()),
            Arc::clone(&event_bus),
        )
        .expect("Invalid pipeline configuration"),
    );

    // --- App state ---
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!(
        in_flight = orchestrator.in_flight(),
        "Server stopped accepting connections, draining jobs"
    );
    orchestrator.shutdown(config.shutdown_timeout()).await;

    event_log_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Mirror job events into the log.
async fn log_events(mut rx: tokio::sync::broadcast::Receiver<imgpipe_events::JobEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::debug!(
                    event_type = %event.event_type,
                    job_id = %event.job_id,
                    payload = %event.payload,
                    "Job event"
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged behind the bus");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
