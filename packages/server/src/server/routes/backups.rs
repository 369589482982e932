//! Snapshot review endpoints (approve / restore).

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domains::generation::backup;
use crate::server::app::AppState;

fn internal_error(context: &str, error: anyhow::Error) -> Response {
    tracing::error!(error = %error, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// POST /api/backups/:item_id/approve
pub async fn approve_backup_handler(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Response {
    match backup::approve_item(&state.deps, item_id).await {
        Ok(true) => Json(json!({ "approved": true })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no snapshot for item" })),
        )
            .into_response(),
        Err(e) => internal_error("snapshot approve failed", e),
    }
}

/// POST /api/backups/:item_id/restore
pub async fn restore_backup_handler(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Response {
    match backup::restore_item(&state.deps, item_id).await {
        Ok(true) => Json(json!({ "restored": true })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no snapshot for item" })),
        )
            .into_response(),
        Err(e) => internal_error("snapshot restore failed", e),
    }
}

#[derive(Deserialize)]
pub struct BulkBackupRequest {
    #[serde(default)]
    pub restore_ids: Vec<Uuid>,
    #[serde(default)]
    pub approve_ids: Vec<Uuid>,
}

/// POST /api/backups/bulk
pub async fn bulk_backup_handler(
    State(state): State<AppState>,
    Json(request): Json<BulkBackupRequest>,
) -> Response {
    match backup::bulk_backup_action(&state.deps, &request.restore_ids, &request.approve_ids).await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => internal_error("bulk backup action failed", e),
    }
}

#[derive(Deserialize)]
pub struct AutoRestoreCheckRequest {
    pub batch_id: Uuid,
    /// Settled scores recomputed by the client after the batch
    /// finished; items left out fall back to the provider's score.
    #[serde(default)]
    pub scores: HashMap<Uuid, i32>,
}

/// POST /api/backups/auto-restore-check
pub async fn auto_restore_check_handler(
    State(state): State<AppState>,
    Json(request): Json<AutoRestoreCheckRequest>,
) -> Response {
    let batch = match state.deps.store.find_batch(request.batch_id).await {
        Ok(Some(batch)) => batch,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "batch not found" })),
            )
                .into_response()
        }
        Err(e) => return internal_error("batch lookup failed", e),
    };

    match backup::auto_restore_check(&state.deps, &batch, &request.scores).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => internal_error("auto-restore check failed", e),
    }
}
