use anyhow::Result;
use axum::{extract::Extension, response::Json, routing::get, Router};
use mercury_core::metrics::Metrics;
use mercury_push::ConnectionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing;

#[derive(Clone)]
struct MetricsState {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mercury-metrics"
    }))
}

async fn metrics(Extension(state): Extension<MetricsState>) -> Json<serde_json::Value> {
    Json(state.metrics.snapshot(state.registry.count()))
}

/// Second listener: liveness plus counter snapshots, no auth.
pub async fn run(
    host: &str,
    port: u16,
    registry: Arc<ConnectionRegistry>,
    shared: Arc<Metrics>,
) -> Result<()> {
    let state = MetricsState {
        registry,
        metrics: shared,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(Extension(state));

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!("Starting metrics server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
