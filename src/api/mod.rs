//! REST surface over `SyncBridge`.
//!
//! Endpoints:
//! - `POST /prompt_sync?timeout=<secs>` submit a workflow and wait for it
//! - `POST /prompt` native `/prompt` shape, answered once the prompt finished
//! - `GET  /health` engine reachability and queue depth (always 200)
//! - `GET  /queue` engine queue, passed through
//! - `GET  /history` and `GET /history/:id` engine history, passed through
//! - `POST /interrupt/:id` best-effort cancel
//! - `GET  /` service descriptor

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::assembler::ArtifactMode;
use crate::bridge::{PromptAck, SubmitOptions, SyncBridge};
use crate::client::JobEngine;
use crate::envelope::{HealthReport, NodeErrors, ResultEnvelope};
use crate::error::BridgeError;

// =============================================================================
// ROUTER
// =============================================================================

/// Build the bridge router. The bridge is shared by every request.
pub fn build_router<E: JobEngine + 'static>(bridge: Arc<SyncBridge<E>>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/prompt", post(prompt::<E>))
        .route("/prompt_sync", post(prompt_sync::<E>))
        .route("/health", get(health::<E>))
        .route("/queue", get(queue::<E>))
        .route("/history", get(history_all::<E>))
        .route("/history/:id", get(history::<E>))
        .route("/interrupt/:id", post(interrupt::<E>))
        .layer(TraceLayer::new_for_http())
        .with_state(bridge)
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    /// The bridge call itself failed.
    Bridge(BridgeError),
    /// `/prompt` only: the prompt ran but the engine reported node errors.
    ExecutionFailed {
        prompt_id: String,
        node_errors: NodeErrors,
    },
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self::Bridge(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Bridge(BridgeError::Timeout { .. }) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Bridge(BridgeError::Connection { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Bridge(BridgeError::Rejected { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Bridge(BridgeError::InconsistentState { .. })
            | ApiError::ExecutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Bridge(err) => {
                let mut body = json!({
                    "error": err.kind(),
                    "detail": err.to_string(),
                    "prompt_id": err.job_id(),
                });
                if let Some(node_errors) = err.node_errors() {
                    body["node_errors"] = json!(node_errors);
                }
                body
            }
            ApiError::ExecutionFailed {
                prompt_id,
                node_errors,
            } => json!({
                "error": "execution_failed",
                "detail": format!("Task {prompt_id} finished with node errors"),
                "prompt_id": prompt_id,
                "node_errors": node_errors,
            }),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: Value,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub return_image_base64: bool,
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    /// Seconds; absent or `0` falls back to the configured default.
    pub timeout: Option<u64>,
}

impl SyncParams {
    fn timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

async fn prompt_sync<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
    Query(params): Query<SyncParams>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<ResultEnvelope>, ApiError> {
    let options = SubmitOptions {
        client_id: req.client_id,
        artifact_mode: ArtifactMode::from_flag(req.return_image_base64),
        timeout: params.timeout(),
    };

    match bridge.submit_and_wait_with(req.prompt, &options).await {
        Ok(envelope) => Ok(Json(envelope)),
        Err(err) => {
            tracing::warn!(
                kind = err.kind(),
                job_id = ?err.job_id(),
                error = %err,
                "prompt_sync failed"
            );
            Err(err.into())
        }
    }
}

async fn prompt<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<PromptAck>, ApiError> {
    let ack = bridge
        .queue_prompt(req.prompt, req.client_id)
        .await
        .map_err(|err| {
            tracing::warn!(
                kind = err.kind(),
                job_id = ?err.job_id(),
                error = %err,
                "prompt failed"
            );
            ApiError::from(err)
        })?;

    if ack.is_success() {
        Ok(Json(ack))
    } else {
        Err(ApiError::ExecutionFailed {
            prompt_id: ack.prompt_id,
            node_errors: ack.node_errors,
        })
    }
}

async fn health<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
) -> Json<HealthReport> {
    Json(bridge.health().await)
}

async fn queue<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
) -> Result<Json<Value>, ApiError> {
    let body = bridge
        .engine()
        .queue_raw()
        .await
        .map_err(|e| BridgeError::from_client(e, None))?;
    Ok(Json(body))
}

async fn history_all<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
) -> Result<Json<Value>, ApiError> {
    let body = bridge
        .engine()
        .history_raw()
        .await
        .map_err(|e| BridgeError::from_client(e, None))?;
    Ok(Json(body))
}

async fn history<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let entry = bridge
        .engine()
        .get_result(&id)
        .await
        .map_err(|e| BridgeError::from_client(e, Some(&id)))?;
    let mut body = serde_json::Map::new();
    if let Some(entry) = entry {
        body.insert(id, entry.0);
    }
    Ok(Json(Value::Object(body)))
}

async fn interrupt<E: JobEngine + 'static>(
    State(bridge): State<Arc<SyncBridge<E>>>,
    Path(id): Path<String>,
) -> Json<Value> {
    bridge.engine().interrupt(&id).await;
    tracing::info!(job_id = %id, "Interrupt requested");
    Json(json!({"status": "interrupted", "prompt_id": id}))
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "comfy-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /prompt_sync": "submit a workflow and wait for its outputs",
            "POST /prompt": "native /prompt response, sent once the prompt finished",
            "GET /health": "engine reachability and queue depth",
            "GET /queue": "engine queue",
            "GET /history": "engine history for every retained prompt",
            "GET /history/:id": "engine history for one prompt",
            "POST /interrupt/:id": "cancel a prompt",
        }
    }))
}
