//! OAuth HTTP handlers: RFC 6749 token endpoint, JWKS, OIDC discovery (§6).

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::Json;

use crate::error::AppError;
use crate::oauth::issuer::TokenRequest;

use super::AppState;

pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let response = state.issuer.issue_token(&request)?;
    Ok(Json(
        serde_json::to_value(response).expect("token response serializes"),
    ))
}

pub async fn jwks(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.issuer.jwks()).expect("jwks serializes"))
}

pub async fn openid_configuration(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.issuer.openid_configuration(&state.config.issuer);
    Json(serde_json::to_value(config).expect("openid configuration serializes"))
}
