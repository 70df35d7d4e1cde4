//! Typed error taxonomy for every component, composed into one `AppError`
//! the HTTP facade maps to a status code and body shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("cannot serialize value: {0}")]
    Encode(String),
    #[error("cannot deserialize value: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StateBackendError {
    #[error("key '{0}' not found")]
    KeyNotFound(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("backend operation failed after retries: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(String),
    #[error("checksum mismatch: stored {stored}, calculated {calculated}")]
    ChecksumMismatch { stored: String, calculated: String },
    #[error("unsupported snapshot version: {0} (expected 1.0)")]
    UnsupportedVersion(String),
    #[error(transparent)]
    Backend(#[from] StateBackendError),
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unsupported grant type: {0}")]
    InvalidGrant(String),
    #[error("invalid or unsupported scope: {0}")]
    InvalidScope(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("invalid secret name '{name}': {reason}")]
    InvalidSecretName { name: String, reason: String },
    #[error("secret '{name}' not found")]
    SecretNotFound {
        name: String,
        version: Option<String>,
    },
    #[error("secret '{0}' is disabled or outside its validity window")]
    SecretDisabled(String),
    #[error("vault '{0}' not found")]
    VaultNotFound(String),
}

/// Composed application error; the HTTP facade matches this once to decide
/// status code and body shape (§7 of the specification).
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    State(#[from] StateBackendError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    KeyVault(#[from] KeyVaultError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl AppError {
    /// Maps the error taxonomy onto an HTTP status and Azure-shaped body,
    /// per §7: Validation->400, Not-found->404, Policy->403, everything
    /// else->500.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::KeyVault(KeyVaultError::InvalidSecretName { .. }) => {
                (StatusCode::BAD_REQUEST, "BadParameter")
            }
            AppError::KeyVault(KeyVaultError::SecretNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "SecretNotFound")
            }
            AppError::KeyVault(KeyVaultError::VaultNotFound(_)) => {
                (StatusCode::NOT_FOUND, "VaultNotFound")
            }
            AppError::KeyVault(KeyVaultError::SecretDisabled(_)) => {
                (StatusCode::FORBIDDEN, "Forbidden")
            }
            AppError::OAuth(OAuthError::InvalidGrant(_)) => {
                (StatusCode::BAD_REQUEST, "unsupported_grant_type")
            }
            AppError::OAuth(OAuthError::InvalidScope(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_scope")
            }
            AppError::OAuth(
                OAuthError::InvalidToken(_)
                | OAuthError::InvalidSignature
                | OAuthError::TokenExpired,
            ) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::State(StateBackendError::KeyNotFound(_)) => {
                (StatusCode::NOT_FOUND, "KeyNotFound")
            }
            AppError::Snapshot(_) | AppError::State(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        tracing::warn!(error = %self, status = %status, "request failed");
        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.to_string(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}
