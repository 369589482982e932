//! Batch lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domains::generation::lifecycle::{self, CreateBatchError, CreateBatchParams};
use crate::server::app::AppState;

fn internal_error(context: &str, error: anyhow::Error) -> Response {
    tracing::error!(error = %error, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

/// POST /api/batches
pub async fn create_batch_handler(
    State(state): State<AppState>,
    Json(params): Json<CreateBatchParams>,
) -> Response {
    match lifecycle::create_batch(&state.deps, params).await {
        Ok(batch) => (
            StatusCode::CREATED,
            Json(json!({
                "batch_id": batch.id,
                "status": batch.status,
                "total_jobs": batch.total_jobs,
            })),
        )
            .into_response(),
        Err(CreateBatchError::EmptyItems) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no content items selected" })),
        )
            .into_response(),
        Err(CreateBatchError::AlreadyActive { batch_id }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "another batch is already active",
                "active_batch_id": batch_id,
            })),
        )
            .into_response(),
        Err(CreateBatchError::Internal(e)) => internal_error("batch creation failed", e),
    }
}

#[derive(Deserialize)]
pub struct ActiveBatchQuery {
    pub owner_id: Uuid,
}

/// GET /api/batches?owner_id=...
pub async fn active_batch_handler(
    State(state): State<AppState>,
    Query(query): Query<ActiveBatchQuery>,
) -> Response {
    match lifecycle::get_active_batch(&state.deps, query.owner_id).await {
        Ok(Some(batch)) => Json(json!({
            "batch_id": batch.id,
            "status": batch.status,
            "total_jobs": batch.total_jobs,
            "created_at": batch.created_at,
        }))
        .into_response(),
        Ok(None) => Json(json!({ "batch_id": null })).into_response(),
        Err(e) => internal_error("active batch lookup failed", e),
    }
}

/// GET /api/batches/:id/status
pub async fn batch_status_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Response {
    match lifecycle::get_batch_status(&state.deps, batch_id).await {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => not_found("batch"),
        Err(e) => internal_error("batch status read failed", e),
    }
}

/// GET /api/batches/:id/results
pub async fn batch_results_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Response {
    match lifecycle::get_batch_results(&state.deps, batch_id).await {
        Ok(Some(results)) => Json(results).into_response(),
        Ok(None) => not_found("batch"),
        Err(e) => internal_error("batch results read failed", e),
    }
}

/// POST /api/batches/:id/cancel
pub async fn cancel_batch_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Response {
    match lifecycle::cancel_batch(&state.deps, batch_id).await {
        Ok(Some(outcome)) => Json(outcome).into_response(),
        Ok(None) => not_found("batch"),
        Err(e) => internal_error("batch cancel failed", e),
    }
}
