//! `LocalZure` binary entry point: loads configuration, builds the state
//! backend, Key Vault engine and OAuth issuer, and serves the HTTP facade.

use std::sync::Arc;

use localzure::config::Config;
use localzure::http::{router, AppState};
use localzure::keyvault::KeyVaultEngine;
use localzure::logging::init_tracing;
use localzure::oauth::TokenIssuer;
use localzure::state::Backend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config.logging);

    tracing::info!(bind_addr = %config.bind_addr, "starting localzure");

    let backend = Backend::from_config(&config).await?;
    let keyvault = KeyVaultEngine::new(config.soft_delete_enabled, config.retention_days);
    let issuer = TokenIssuer::generate(config.issuer.clone(), config.token_lifetime_secs);

    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState {
        backend,
        keyvault,
        issuer,
        config,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr = %bind_addr, "localzure listening");
    axum::serve(listener, app).await?;
    Ok(())
}
