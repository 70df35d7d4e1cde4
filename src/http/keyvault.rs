//! Key Vault HTTP handlers — thin wrappers around [`KeyVaultEngine`] (§6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::error::AppError;
use crate::keyvault::models::{SetSecretRequest, UpdateSecretRequest};

use super::AppState;

fn max_results(params: &HashMap<String, String>) -> Option<usize> {
    params.get("maxresults").and_then(|v| v.parse().ok())
}

pub async fn set_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
    Json(request): Json<SetSecretRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state.keyvault.set_secret(&vault, &name, request).await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn get_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state.keyvault.get_secret(&vault, &name, None).await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn get_secret_version(
    State(state): State<Arc<AppState>>,
    Path((vault, name, version)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state
        .keyvault
        .get_secret(&vault, &name, Some(&version))
        .await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Path(vault): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .keyvault
        .list_secrets(&vault, max_results(&params))
        .await?;
    Ok(Json(serde_json::to_value(result).expect("list serializes")))
}

pub async fn list_secret_versions(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .keyvault
        .list_secret_versions(&vault, &name, max_results(&params))
        .await?;
    Ok(Json(serde_json::to_value(result).expect("list serializes")))
}

pub async fn update_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name, version)): Path<(String, String, String)>,
    Json(request): Json<UpdateSecretRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state
        .keyvault
        .update_secret_properties(&vault, &name, &version, request)
        .await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state.keyvault.delete_secret(&vault, &name).await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn get_deleted_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state.keyvault.get_deleted_secret(&vault, &name).await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn list_deleted_secrets(
    State(state): State<Arc<AppState>>,
    Path(vault): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .keyvault
        .list_deleted_secrets(&vault, max_results(&params))
        .await?;
    Ok(Json(serde_json::to_value(result).expect("list serializes")))
}

pub async fn recover_deleted_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state.keyvault.recover_deleted_secret(&vault, &name).await?;
    Ok(Json(
        serde_json::to_value(bundle).expect("bundle serializes"),
    ))
}

pub async fn purge_deleted_secret(
    State(state): State<Arc<AppState>>,
    Path((vault, name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.keyvault.purge_deleted_secret(&vault, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
