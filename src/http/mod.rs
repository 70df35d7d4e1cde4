//! HTTP facade (§4.F): a thin `axum` router mapping REST paths onto the
//! Key Vault engine and OAuth authority. No business logic lives here
//! beyond request/response shaping.

mod admin;
mod keyvault;
mod oauth;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::keyvault::KeyVaultEngine;
use crate::oauth::TokenIssuer;
use crate::state::Backend;

#[derive(Debug)]
pub struct AppState {
    pub backend: Backend,
    pub keyvault: KeyVaultEngine,
    pub issuer: TokenIssuer,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(admin::healthz))
        .route("/.localzure/admin/snapshot", post(admin::create_snapshot))
        .route("/.localzure/admin/restore", post(admin::restore_snapshot))
        .route("/.localzure/oauth/token", post(oauth::issue_token))
        .route("/.localzure/oauth/keys", get(oauth::jwks))
        .route(
            "/.well-known/openid-configuration",
            get(oauth::openid_configuration),
        )
        .route("/{vault}/secrets/{name}", put(keyvault::set_secret))
        .route("/{vault}/secrets/{name}", get(keyvault::get_secret))
        .route("/{vault}/secrets/{name}", delete(keyvault::delete_secret))
        .route(
            "/{vault}/secrets/{name}/{version}",
            get(keyvault::get_secret_version),
        )
        .route(
            "/{vault}/secrets/{name}/{version}",
            patch(keyvault::update_secret),
        )
        .route("/{vault}/secrets", get(keyvault::list_secrets))
        .route(
            "/{vault}/secrets/{name}/versions",
            get(keyvault::list_secret_versions),
        )
        .route(
            "/{vault}/deletedsecrets/{name}",
            get(keyvault::get_deleted_secret),
        )
        .route(
            "/{vault}/deletedsecrets/{name}",
            delete(keyvault::purge_deleted_secret),
        )
        .route(
            "/{vault}/deletedsecrets",
            get(keyvault::list_deleted_secrets),
        )
        .route(
            "/{vault}/deletedsecrets/{name}/recover",
            post(keyvault::recover_deleted_secret),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
