use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::api::{
    get_report, get_run, health_check, list_reports, list_runs, list_tasks, scheduler_status,
    trigger_run, AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:name/run", post(trigger_run))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:id", get(get_run))
        .route("/api/runs/:id/report", get(get_report))
        .route("/api/reports", get(list_reports))
        .route("/api/scheduler/status", get(scheduler_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until `shutdown_rx` turns true.
pub async fn run_server(
    listen: &str,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Web server listening on {}", listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
