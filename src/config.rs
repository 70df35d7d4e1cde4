//! Process configuration loaded from environment variables.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables so the binary runs with zero configuration in a
//! dev loop and is fully configurable in CI/containers.

use std::net::SocketAddr;

use crate::logging::LoggingConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP facade binds to.
    pub bind_addr: SocketAddr,
    /// OAuth token issuer URL, embedded in `iss` claims and OIDC discovery.
    pub issuer: String,
    /// JWT lifetime in seconds.
    pub token_lifetime_secs: u64,
    /// Redis connection URL. When unset, the in-memory backend is used.
    pub redis_url: Option<String>,
    /// Key prefix applied to every Redis key.
    pub redis_key_prefix: String,
    /// Maximum retry attempts for a transient Redis fault.
    pub redis_max_retries: u32,
    /// Base delay for the Redis retry's exponential backoff.
    pub redis_retry_base_delay_ms: u64,
    /// Whether Key Vault deletions are soft (recoverable) or hard.
    pub soft_delete_enabled: bool,
    /// Retention period for soft-deleted secrets, clamped into [7, 90].
    pub retention_days: u32,
    /// Default `api-version` advertised; the facade accepts and ignores it.
    pub api_version_default: String,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("static socket addr"),
            issuer: "https://localzure.local".to_string(),
            token_lifetime_secs: 3600,
            redis_url: None,
            redis_key_prefix: "localzure:".to_string(),
            redis_max_retries: 3,
            redis_retry_base_delay_ms: 100,
            soft_delete_enabled: true,
            retention_days: 90,
            api_version_default: "7.3".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_var_or_default("LOCALZURE_BIND_ADDR", defaults.bind_addr),
            issuer: env_var_or_default_str("LOCALZURE_ISSUER", &defaults.issuer),
            token_lifetime_secs: env_var_or_default(
                "LOCALZURE_TOKEN_LIFETIME",
                defaults.token_lifetime_secs,
            ),
            redis_url: std::env::var("LOCALZURE_REDIS_URL").ok(),
            redis_key_prefix: env_var_or_default_str(
                "LOCALZURE_REDIS_KEY_PREFIX",
                &defaults.redis_key_prefix,
            ),
            redis_max_retries: env_var_or_default(
                "LOCALZURE_REDIS_MAX_RETRIES",
                defaults.redis_max_retries,
            ),
            redis_retry_base_delay_ms: env_var_or_default(
                "LOCALZURE_REDIS_RETRY_BASE_DELAY_MS",
                defaults.redis_retry_base_delay_ms,
            ),
            soft_delete_enabled: env_var_or_default_bool(
                "LOCALZURE_SOFT_DELETE_ENABLED",
                defaults.soft_delete_enabled,
            ),
            retention_days: clamp_retention_days(env_var_or_default(
                "LOCALZURE_RETENTION_DAYS",
                defaults.retention_days,
            )),
            api_version_default: env_var_or_default_str(
                "LOCALZURE_API_VERSION_DEFAULT",
                &defaults.api_version_default,
            ),
            logging: defaults.logging,
        }
    }
}

/// Clamps retention days into `[7, 90]` (§4.E): 1 and 100 clamp to 7 and
/// 90; values already inside the range pass through unchanged.
#[must_use]
pub fn clamp_retention_days(days: u32) -> u32 {
    days.clamp(7, 90)
}

fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map_or(default, |v| {
        let v_lower = v.to_lowercase();
        v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
    })
}

fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_days_clamp_boundaries() {
        assert_eq!(clamp_retention_days(1), 7);
        assert_eq!(clamp_retention_days(100), 90);
        assert_eq!(clamp_retention_days(7), 7);
        assert_eq!(clamp_retention_days(90), 90);
    }

    #[test]
    fn default_config_has_in_memory_backend() {
        let config = Config::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.retention_days, 90);
    }
}
