//! Ambient health/admin endpoints (§4.F): not part of the base route table,
//! additive surface for operator and test convenience.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, SnapshotError};
use crate::snapshot;

use super::AppState;

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.keyvault.health().await)
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    path: String,
    #[serde(default)]
    services: Option<Vec<String>>,
}

pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let backend_type = if state.config.redis_url.is_some() {
        "redis"
    } else {
        "memory"
    };
    let bytes =
        snapshot::create_snapshot(&state.backend, backend_type, request.services.as_deref())
            .await?;
    tokio::fs::write(&request.path, &bytes)
        .await
        .map_err(|e| AppError::from(SnapshotError::Io(e.to_string())))?;
    Ok(Json(
        serde_json::json!({"path": request.path, "bytes": bytes.len()}),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RestoreSnapshotRequest {
    path: String,
    #[serde(default = "default_true")]
    validate: bool,
    #[serde(default = "default_true")]
    backup: bool,
    #[serde(default)]
    clear_existing: bool,
}

fn default_true() -> bool {
    true
}

pub async fn restore_snapshot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RestoreSnapshotRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bytes = tokio::fs::read(&request.path)
        .await
        .map_err(|e| AppError::from(SnapshotError::Io(e.to_string())))?;

    if request.backup {
        backup_current_state(&state, &request.path).await;
    }

    let metadata = snapshot::restore_snapshot(
        &state.backend,
        &bytes,
        request.clear_existing,
        request.validate,
    )
    .await?;
    Ok(Json(
        serde_json::to_value(metadata).expect("metadata serializes"),
    ))
}

/// Writes a timestamped snapshot of the current backend state to
/// `<path>.backup.<YYYYMMDD_HHMMSS>.gz` before a destructive restore.
/// Failure is logged, not propagated — a failed backup must not block the
/// restore it was meant to protect.
async fn backup_current_state(state: &Arc<AppState>, path: &str) {
    let backend_type = if state.config.redis_url.is_some() {
        "redis"
    } else {
        "memory"
    };
    let backup_path = format!(
        "{path}.backup.{}.gz",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    match snapshot::create_snapshot(&state.backend, backend_type, None).await {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::write(&backup_path, &bytes).await {
                tracing::warn!(backup_path, error = %e, "backup creation failed");
            } else {
                tracing::info!(backup_path, "created backup before restore");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "backup creation failed");
        }
    }
}
