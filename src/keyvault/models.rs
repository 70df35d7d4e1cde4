//! Key Vault wire types (§4.E): Azure-shaped JSON bodies for secret bundles,
//! list results and soft-delete records, plus the server-side `Secret`
//! aggregate that tracks every version of a name.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_recovery_level() -> String {
    "Recoverable+Purgeable".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretAttributes {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "nbf", skip_serializing_if = "Option::is_none", default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "exp", skip_serializing_if = "Option::is_none", default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default = "default_recovery_level")]
    pub recovery_level: String,
}

impl Default for SecretAttributes {
    fn default() -> Self {
        Self {
            enabled: true,
            not_before: None,
            expires: None,
            created: None,
            updated: None,
            recovery_level: default_recovery_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    pub id: String,
    pub value: String,
    #[serde(
        rename = "contentType",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub content_type: Option<String>,
    pub attributes: SecretAttributes,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretItem {
    pub id: String,
    #[serde(
        rename = "contentType",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub content_type: Option<String>,
    pub attributes: SecretAttributes,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretListResult {
    pub value: Vec<SecretItem>,
    #[serde(rename = "nextLink", skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSecretRequest {
    pub value: String,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub attributes: Option<SecretAttributes>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSecretRequest {
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub attributes: Option<SecretAttributesPatch>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

/// Attribute patch for `PATCH /secrets/{name}/{version}`: every field is
/// optional so an omitted field leaves the stored attribute untouched,
/// unlike [`SecretAttributes`] where `enabled` defaults to `true`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretAttributesPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(rename = "nbf", default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "exp", default)]
    pub expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSecretBundle {
    pub id: String,
    #[serde(rename = "recoveryId")]
    pub recovery_id: String,
    #[serde(rename = "scheduledPurgeDate", skip_serializing_if = "Option::is_none")]
    pub scheduled_purge_date: Option<DateTime<Utc>>,
    #[serde(rename = "deletedDate", skip_serializing_if = "Option::is_none")]
    pub deleted_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub attributes: SecretAttributes,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSecretItem {
    pub id: String,
    #[serde(rename = "recoveryId")]
    pub recovery_id: String,
    #[serde(rename = "scheduledPurgeDate", skip_serializing_if = "Option::is_none")]
    pub scheduled_purge_date: Option<DateTime<Utc>>,
    #[serde(rename = "deletedDate", skip_serializing_if = "Option::is_none")]
    pub deleted_date: Option<DateTime<Utc>>,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub attributes: SecretAttributes,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedSecretListResult {
    pub value: Vec<DeletedSecretItem>,
}

/// A secret's full version history, keyed by name within a vault.
#[derive(Debug, Clone, Default)]
pub struct Secret {
    pub name: String,
    pub versions: HashMap<String, SecretBundle>,
    pub current_version: Option<String>,
    pub deleted: bool,
    pub deleted_date: Option<DateTime<Utc>>,
    pub recovery_id: Option<String>,
}

impl Secret {
    /// Validates a secret name against Azure's naming rule: starts with a
    /// letter, contains only alphanumerics and hyphens, ends with an
    /// alphanumeric, max 127 characters. A single letter is a valid name.
    pub fn validate_name(name: &str) -> Result<(), String> {
        if name.len() > 127 {
            return Err("secret name exceeds 127 characters".to_string());
        }
        let mut chars = name.chars();
        let first = chars
            .next()
            .ok_or_else(|| "secret name must not be empty".to_string())?;
        if !first.is_ascii_alphabetic() {
            return Err("secret name must start with a letter".to_string());
        }
        let rest: Vec<char> = chars.collect();
        if let Some(last) = rest.last() {
            if !last.is_ascii_alphanumeric() {
                return Err("secret name must end with a letter or digit".to_string());
            }
        }
        if rest
            .iter()
            .any(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err("secret name must contain only letters, digits and hyphens".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_name() {
        assert!(Secret::validate_name("my-secret-1").is_ok());
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(Secret::validate_name("1secret").is_err());
    }

    #[test]
    fn accepts_single_character_name() {
        assert!(Secret::validate_name("a").is_ok());
    }

    #[test]
    fn rejects_trailing_hyphen() {
        assert!(Secret::validate_name("secret-").is_err());
    }
}
