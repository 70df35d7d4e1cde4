//! Logging configuration.
//!
//! Allows fine-grained control over logging verbosity per concern, and
//! initializes the global `tracing` subscriber.

use serde::{Deserialize, Serialize};

/// Log level configuration.
///
/// Log levels follow the standard hierarchy: DEBUG includes INFO and WARN,
/// WARN includes ERROR.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[derive(Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Per-concern logging verbosity. Each module calls `tracing::info!` etc.
/// directly; this struct only drives the default `EnvFilter` directives so
/// an operator can turn up `state` tracing without drowning in OAuth noise.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level for the state backend (get/set/delete/transactions).
    #[serde(default)]
    pub state: LogLevel,
    /// Log level for the Key Vault engine (secret lifecycle operations).
    #[serde(default)]
    pub keyvault: LogLevel,
    /// Log level for the OAuth authority (token issuance/validation).
    #[serde(default)]
    pub oauth: LogLevel,
    /// Log level for the snapshot engine (create/restore/validate).
    #[serde(default)]
    pub snapshot: LogLevel,
    /// Log level for the HTTP facade (request/response logging).
    #[serde(default)]
    pub http: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            state: LogLevel::Info,
            keyvault: LogLevel::Info,
            oauth: LogLevel::Info,
            snapshot: LogLevel::Info,
            http: LogLevel::Info,
        }
    }
}

impl LoggingConfig {
    /// Builds the `EnvFilter` directive string from per-concern levels.
    /// `RUST_LOG`, if set, still takes precedence (tracing-subscriber
    /// merges user directives on top of these defaults).
    fn filter_directives(&self) -> String {
        format!(
            "localzure::state={},localzure::keyvault={},localzure::oauth={},localzure::snapshot={},localzure::http={}",
            self.state.directive(),
            self.keyvault.directive(),
            self.oauth.directive(),
            self.snapshot.directive(),
            self.http.directive(),
        )
    }
}

/// Initializes the global tracing subscriber. Safe to call once per
/// process; a second call is a no-op (the underlying `try_init` just
/// returns an error we ignore).
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let default_directives = config.filter_directives();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{default_directives}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
