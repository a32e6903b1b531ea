//! HTTP ingest surface.
//!
//! The transport layer (broker, bucket notifications) lives outside this
//! service; raw envelopes are posted here and fed into the pipeline.

use crate::config::ApiConfig;
use crate::envelope::EnvelopeError;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Response for an accepted notification
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    /// Number of domain events published from the payload
    pub published: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/v1/notifications/uploads", post(ingest_upload))
        .route("/v1/notifications/metadata", post(ingest_metadata))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-catalog"
    }))
}

/// Readiness check: workers must still be running
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.pipeline.is_running() {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready" })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready" })),
        )
    }
}

async fn ingest_upload(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<AcceptedResponse>), (StatusCode, Json<ErrorResponse>)> {
    let published = state
        .pipeline
        .ingest_upload_payload(&body)
        .await
        .map_err(malformed)?;

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { published })))
}

async fn ingest_metadata(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<AcceptedResponse>), (StatusCode, Json<ErrorResponse>)> {
    let published = state
        .pipeline
        .ingest_metadata_payload(&body)
        .await
        .map_err(malformed)?;

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { published })))
}

fn malformed(err: EnvelopeError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: err.to_string(),
            code: "MALFORMED_ENVELOPE".to_string(),
        }),
    )
}

/// Bind and serve the ingest API
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {addr}"))?;

    info!(addr = %addr, "ingest API listening");

    axum::serve(listener, create_router(state))
        .await
        .context("API server failed")?;

    Ok(())
}
