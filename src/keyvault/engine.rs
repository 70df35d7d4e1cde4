//! Key Vault secret engine (§4.E): versioned secrets with soft-delete,
//! purge, recovery and validity windows. State lives entirely in-process
//! behind a single mutex, mirroring the Python backend's `asyncio.Lock`
//! guarding two `vault_name -> secret_name -> Secret` maps.

use std::collections::HashMap;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::KeyVaultError;

use super::models::{
    DeletedSecretBundle, DeletedSecretItem, DeletedSecretListResult, Secret, SecretBundle,
    SecretItem, SecretListResult, SetSecretRequest, UpdateSecretRequest,
};

#[derive(Debug)]
struct Vaults {
    live: HashMap<String, HashMap<String, Secret>>,
    deleted: HashMap<String, HashMap<String, Secret>>,
}

#[derive(Debug)]
pub struct KeyVaultEngine {
    vaults: Mutex<Vaults>,
    soft_delete_enabled: bool,
    retention_days: u32,
}

impl KeyVaultEngine {
    #[must_use]
    pub fn new(soft_delete_enabled: bool, retention_days: u32) -> Self {
        Self {
            vaults: Mutex::new(Vaults {
                live: HashMap::new(),
                deleted: HashMap::new(),
            }),
            soft_delete_enabled,
            retention_days: retention_days.clamp(7, 90),
        }
    }

    fn secret_id(vault_name: &str, secret_name: &str, version: Option<&str>) -> String {
        let base = format!("https://{vault_name}.vault.azure.net/secrets/{secret_name}");
        match version {
            Some(v) => format!("{base}/{v}"),
            None => base,
        }
    }

    fn version_id(secret_name: &str, value: &str) -> String {
        let content = format!("{secret_name}:{value}:{}", Utc::now().to_rfc3339());
        let digest = Sha256::digest(content.as_bytes());
        let hex: String = digest.iter().fold(String::new(), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        });
        let hex = &hex[..32];
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    fn check_validity(bundle: &SecretBundle) -> Result<(), KeyVaultError> {
        let name = bundle
            .id
            .rsplit('/')
            .nth(1)
            .unwrap_or(&bundle.id)
            .to_string();
        let attrs = &bundle.attributes;
        let now = Utc::now();
        if !attrs.enabled {
            return Err(KeyVaultError::SecretDisabled(name));
        }
        if let Some(not_before) = attrs.not_before {
            if now < not_before {
                return Err(KeyVaultError::SecretDisabled(name));
            }
        }
        if let Some(expires) = attrs.expires {
            if now > expires {
                return Err(KeyVaultError::SecretDisabled(name));
            }
        }
        Ok(())
    }

    pub async fn set_secret(
        &self,
        vault_name: &str,
        secret_name: &str,
        request: SetSecretRequest,
    ) -> Result<SecretBundle, KeyVaultError> {
        Secret::validate_name(secret_name).map_err(|reason| KeyVaultError::InvalidSecretName {
            name: secret_name.to_string(),
            reason,
        })?;

        let mut vaults = self.vaults.lock().await;
        let vault = vaults.live.entry(vault_name.to_string()).or_default();

        let version = Self::version_id(secret_name, &request.value);
        let now = Utc::now();
        let mut attributes = request.attributes.unwrap_or_default();
        attributes.created = Some(now);
        attributes.updated = Some(now);

        let bundle = SecretBundle {
            id: Self::secret_id(vault_name, secret_name, Some(&version)),
            value: request.value,
            content_type: request.content_type,
            attributes,
            tags: request.tags.unwrap_or_default(),
            kid: None,
            managed: false,
        };

        let secret = vault
            .entry(secret_name.to_string())
            .or_insert_with(|| Secret {
                name: secret_name.to_string(),
                ..Default::default()
            });
        secret.versions.insert(version.clone(), bundle.clone());
        secret.current_version = Some(version);

        Ok(bundle)
    }

    pub async fn get_secret(
        &self,
        vault_name: &str,
        secret_name: &str,
        version: Option<&str>,
    ) -> Result<SecretBundle, KeyVaultError> {
        let vaults = self.vaults.lock().await;
        let vault = vaults
            .live
            .get(vault_name)
            .ok_or_else(|| KeyVaultError::VaultNotFound(vault_name.to_string()))?;
        let secret = vault
            .get(secret_name)
            .ok_or_else(|| not_found(secret_name, None))?;
        if secret.deleted {
            return Err(not_found(secret_name, None));
        }

        let bundle = if let Some(v) = version {
            secret
                .versions
                .get(v)
                .ok_or_else(|| not_found(secret_name, Some(v.to_string())))?
        } else {
            let current = secret
                .current_version
                .as_ref()
                .ok_or_else(|| not_found(secret_name, None))?;
            secret
                .versions
                .get(current)
                .expect("current version exists")
        };
        Self::check_validity(bundle)?;
        Ok(bundle.clone())
    }

    pub async fn list_secrets(
        &self,
        vault_name: &str,
        max_results: Option<usize>,
    ) -> Result<SecretListResult, KeyVaultError> {
        let vaults = self.vaults.lock().await;
        let vault = vaults
            .live
            .get(vault_name)
            .ok_or_else(|| KeyVaultError::VaultNotFound(vault_name.to_string()))?;

        let mut items: Vec<SecretItem> = vault
            .values()
            .filter(|secret| !secret.deleted && secret.current_version.is_some())
            .map(|secret| {
                let bundle = secret
                    .versions
                    .get(secret.current_version.as_ref().unwrap())
                    .expect("current version exists");
                SecretItem {
                    id: Self::secret_id(vault_name, &secret.name, None),
                    content_type: bundle.content_type.clone(),
                    attributes: bundle.attributes.clone(),
                    tags: bundle.tags.clone(),
                    managed: bundle.managed,
                }
            })
            .collect();
        if let Some(max) = max_results {
            items.truncate(max);
        }
        Ok(SecretListResult {
            value: items,
            next_link: None,
        })
    }

    pub async fn list_secret_versions(
        &self,
        vault_name: &str,
        secret_name: &str,
        max_results: Option<usize>,
    ) -> Result<SecretListResult, KeyVaultError> {
        let vaults = self.vaults.lock().await;
        let vault = vaults
            .live
            .get(vault_name)
            .ok_or_else(|| KeyVaultError::VaultNotFound(vault_name.to_string()))?;
        let secret = vault
            .get(secret_name)
            .ok_or_else(|| not_found(secret_name, None))?;

        let mut versions: Vec<(&String, &SecretBundle)> = secret.versions.iter().collect();
        versions.sort_by_key(|(_, bundle)| std::cmp::Reverse(bundle.attributes.created));

        let mut items: Vec<SecretItem> = versions
            .into_iter()
            .map(|(version, bundle)| SecretItem {
                id: Self::secret_id(vault_name, secret_name, Some(version)),
                content_type: bundle.content_type.clone(),
                attributes: bundle.attributes.clone(),
                tags: bundle.tags.clone(),
                managed: bundle.managed,
            })
            .collect();
        if let Some(max) = max_results {
            items.truncate(max);
        }
        Ok(SecretListResult {
            value: items,
            next_link: None,
        })
    }

    pub async fn delete_secret(
        &self,
        vault_name: &str,
        secret_name: &str,
    ) -> Result<DeletedSecretBundle, KeyVaultError> {
        let mut vaults = self.vaults.lock().await;
        if !vaults.live.contains_key(vault_name) {
            return Err(KeyVaultError::VaultNotFound(vault_name.to_string()));
        }
        let vault = vaults.live.get_mut(vault_name).unwrap();
        let mut secret = vault
            .get(secret_name)
            .ok_or_else(|| not_found(secret_name, None))?
            .clone();
        if secret.deleted {
            return Err(not_found(secret_name, None));
        }

        let now = Utc::now();
        let current = secret.current_version.clone();
        let bundle = current
            .as_ref()
            .and_then(|v| secret.versions.get(v))
            .cloned();

        if self.soft_delete_enabled {
            secret.deleted = true;
            secret.deleted_date = Some(now);
            secret.recovery_id = Some(format!(
                "https://{vault_name}.vault.azure.net/deletedsecrets/{secret_name}"
            ));
            vault.remove(secret_name);
            vaults
                .deleted
                .entry(vault_name.to_string())
                .or_default()
                .insert(secret_name.to_string(), secret.clone());

            let purge_date = now + chrono::Duration::days(i64::from(self.retention_days));
            let bundle = bundle.expect("current version exists for a live secret");
            Ok(DeletedSecretBundle {
                id: Self::secret_id(vault_name, secret_name, None),
                recovery_id: secret.recovery_id.unwrap_or_default(),
                scheduled_purge_date: Some(purge_date),
                deleted_date: Some(now),
                value: Some(bundle.value),
                content_type: bundle.content_type,
                attributes: bundle.attributes,
                tags: bundle.tags,
            })
        } else {
            vault.remove(secret_name);
            let bundle = bundle.expect("current version exists for a live secret");
            Ok(DeletedSecretBundle {
                id: Self::secret_id(vault_name, secret_name, None),
                recovery_id: String::new(),
                scheduled_purge_date: None,
                deleted_date: Some(now),
                value: Some(bundle.value),
                content_type: bundle.content_type,
                attributes: bundle.attributes,
                tags: bundle.tags,
            })
        }
    }

    pub async fn update_secret_properties(
        &self,
        vault_name: &str,
        secret_name: &str,
        version: &str,
        request: UpdateSecretRequest,
    ) -> Result<SecretBundle, KeyVaultError> {
        let mut vaults = self.vaults.lock().await;
        let vault = vaults
            .live
            .get_mut(vault_name)
            .ok_or_else(|| KeyVaultError::VaultNotFound(vault_name.to_string()))?;
        let secret = vault
            .get_mut(secret_name)
            .ok_or_else(|| not_found(secret_name, None))?;
        let bundle = secret
            .versions
            .get_mut(version)
            .ok_or_else(|| not_found(secret_name, Some(version.to_string())))?;

        if let Some(content_type) = request.content_type {
            bundle.content_type = Some(content_type);
        }
        if let Some(attrs) = request.attributes {
            if let Some(enabled) = attrs.enabled {
                bundle.attributes.enabled = enabled;
            }
            if attrs.not_before.is_some() {
                bundle.attributes.not_before = attrs.not_before;
            }
            if attrs.expires.is_some() {
                bundle.attributes.expires = attrs.expires;
            }
        }
        if let Some(tags) = request.tags {
            bundle.tags = tags;
        }
        bundle.attributes.updated = Some(Utc::now());

        Ok(bundle.clone())
    }

    pub async fn get_deleted_secret(
        &self,
        vault_name: &str,
        secret_name: &str,
    ) -> Result<DeletedSecretBundle, KeyVaultError> {
        let vaults = self.vaults.lock().await;
        let deleted_vault = vaults
            .deleted
            .get(vault_name)
            .ok_or_else(|| not_found(secret_name, None))?;
        let secret = deleted_vault
            .get(secret_name)
            .ok_or_else(|| not_found(secret_name, None))?;
        let bundle = secret
            .versions
            .get(
                secret
                    .current_version
                    .as_ref()
                    .expect("deleted secret has a current version"),
            )
            .expect("current version exists");

        let purge_date = secret
            .deleted_date
            .map(|d| d + chrono::Duration::days(i64::from(self.retention_days)));

        Ok(DeletedSecretBundle {
            id: Self::secret_id(vault_name, secret_name, None),
            recovery_id: secret.recovery_id.clone().unwrap_or_default(),
            scheduled_purge_date: purge_date,
            deleted_date: secret.deleted_date,
            value: Some(bundle.value.clone()),
            content_type: bundle.content_type.clone(),
            attributes: bundle.attributes.clone(),
            tags: bundle.tags.clone(),
        })
    }

    pub async fn list_deleted_secrets(
        &self,
        vault_name: &str,
        max_results: Option<usize>,
    ) -> Result<DeletedSecretListResult, KeyVaultError> {
        let vaults = self.vaults.lock().await;
        let deleted_vault = vaults
            .deleted
            .get(vault_name)
            .ok_or_else(|| KeyVaultError::VaultNotFound(vault_name.to_string()))?;

        let mut items: Vec<DeletedSecretItem> = deleted_vault
            .values()
            .map(|secret| {
                let bundle = secret
                    .versions
                    .get(
                        secret
                            .current_version
                            .as_ref()
                            .expect("deleted secret has a current version"),
                    )
                    .expect("current version exists");
                let purge_date = secret
                    .deleted_date
                    .map(|d| d + chrono::Duration::days(i64::from(self.retention_days)));
                DeletedSecretItem {
                    id: Self::secret_id(vault_name, &secret.name, None),
                    recovery_id: secret.recovery_id.clone().unwrap_or_default(),
                    scheduled_purge_date: purge_date,
                    deleted_date: secret.deleted_date,
                    content_type: bundle.content_type.clone(),
                    attributes: bundle.attributes.clone(),
                    tags: bundle.tags.clone(),
                }
            })
            .collect();
        if let Some(max) = max_results {
            items.truncate(max);
        }
        Ok(DeletedSecretListResult { value: items })
    }

    pub async fn recover_deleted_secret(
        &self,
        vault_name: &str,
        secret_name: &str,
    ) -> Result<SecretBundle, KeyVaultError> {
        let mut vaults = self.vaults.lock().await;
        let deleted_vault = vaults
            .deleted
            .get_mut(vault_name)
            .ok_or_else(|| not_found(secret_name, None))?;
        let mut secret = deleted_vault
            .remove(secret_name)
            .ok_or_else(|| not_found(secret_name, None))?;

        secret.deleted = false;
        secret.deleted_date = None;
        secret.recovery_id = None;
        let bundle = secret
            .versions
            .get(
                secret
                    .current_version
                    .as_ref()
                    .expect("recovered secret has a current version"),
            )
            .expect("current version exists")
            .clone();

        vaults
            .live
            .entry(vault_name.to_string())
            .or_default()
            .insert(secret_name.to_string(), secret);

        Ok(bundle)
    }

    /// Purges a soft-deleted secret unconditionally. Like the source
    /// engine, this does not check `scheduled_purge_date`, so a purge
    /// before that date is indistinguishable from one after it.
    pub async fn purge_deleted_secret(
        &self,
        vault_name: &str,
        secret_name: &str,
    ) -> Result<(), KeyVaultError> {
        let mut vaults = self.vaults.lock().await;
        let deleted_vault = vaults
            .deleted
            .get_mut(vault_name)
            .ok_or_else(|| not_found(secret_name, None))?;
        if deleted_vault.remove(secret_name).is_none() {
            return Err(not_found(secret_name, None));
        }
        Ok(())
    }

    pub async fn health(&self) -> serde_json::Value {
        let vaults = self.vaults.lock().await;
        let total_vaults = vaults.live.len();
        let total_secrets: usize = vaults
            .live
            .values()
            .map(std::collections::HashMap::len)
            .sum();
        let total_deleted: usize = vaults
            .deleted
            .values()
            .map(std::collections::HashMap::len)
            .sum();
        serde_json::json!({
            "status": "healthy",
            "vaults": total_vaults,
            "secrets": total_secrets,
            "deletedSecrets": total_deleted,
            "softDeleteEnabled": self.soft_delete_enabled,
            "retentionDays": self.retention_days,
        })
    }

    pub async fn reset(&self) {
        let mut vaults = self.vaults.lock().await;
        vaults.live.clear();
        vaults.deleted.clear();
    }
}

fn not_found(name: &str, version: Option<String>) -> KeyVaultError {
    KeyVaultError::SecretNotFound {
        name: name.to_string(),
        version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyvault::models::SecretAttributes;

    fn request(value: &str) -> SetSecretRequest {
        SetSecretRequest {
            value: value.to_string(),
            content_type: None,
            attributes: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let engine = KeyVaultEngine::new(true, 90);
        engine
            .set_secret("vault1", "my-secret", request("hunter2"))
            .await
            .unwrap();
        let bundle = engine
            .get_secret("vault1", "my-secret", None)
            .await
            .unwrap();
        assert_eq!(bundle.value, "hunter2");
    }

    #[tokio::test]
    async fn get_missing_secret_errors() {
        let engine = KeyVaultEngine::new(true, 90);
        engine
            .set_secret("vault1", "exists", request("v"))
            .await
            .unwrap();
        let result = engine.get_secret("vault1", "missing", None).await;
        assert!(matches!(result, Err(KeyVaultError::SecretNotFound { .. })));
    }

    #[tokio::test]
    async fn soft_delete_then_recover_round_trips() {
        let engine = KeyVaultEngine::new(true, 90);
        engine
            .set_secret("vault1", "my-secret", request("v1"))
            .await
            .unwrap();
        engine.delete_secret("vault1", "my-secret").await.unwrap();

        assert!(matches!(
            engine.get_secret("vault1", "my-secret", None).await,
            Err(KeyVaultError::SecretNotFound { .. })
        ));

        let recovered = engine
            .recover_deleted_secret("vault1", "my-secret")
            .await
            .unwrap();
        assert_eq!(recovered.value, "v1");
        assert!(engine.get_secret("vault1", "my-secret", None).await.is_ok());
    }

    #[tokio::test]
    async fn purge_removes_secret_without_checking_purge_date() {
        let engine = KeyVaultEngine::new(true, 90);
        engine
            .set_secret("vault1", "my-secret", request("v1"))
            .await
            .unwrap();
        engine.delete_secret("vault1", "my-secret").await.unwrap();
        engine
            .purge_deleted_secret("vault1", "my-secret")
            .await
            .unwrap();

        assert!(matches!(
            engine.get_deleted_secret("vault1", "my-secret").await,
            Err(KeyVaultError::SecretNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn disabled_secret_is_rejected_on_read() {
        let engine = KeyVaultEngine::new(true, 90);
        let attrs = SecretAttributes {
            enabled: false,
            ..SecretAttributes::default()
        };
        engine
            .set_secret(
                "vault1",
                "my-secret",
                SetSecretRequest {
                    value: "v1".to_string(),
                    content_type: None,
                    attributes: Some(attrs),
                    tags: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            engine.get_secret("vault1", "my-secret", None).await,
            Err(KeyVaultError::SecretDisabled(_))
        ));
    }

    #[tokio::test]
    async fn invalid_secret_name_is_rejected() {
        let engine = KeyVaultEngine::new(true, 90);
        let result = engine
            .set_secret("vault1", "1-bad-name", request("v"))
            .await;
        assert!(matches!(
            result,
            Err(KeyVaultError::InvalidSecretName { .. })
        ));
    }

    #[tokio::test]
    async fn patching_content_type_does_not_re_enable_disabled_secret() {
        use crate::keyvault::models::UpdateSecretRequest;

        let engine = KeyVaultEngine::new(true, 90);
        let attrs = SecretAttributes {
            enabled: false,
            ..SecretAttributes::default()
        };
        let bundle = engine
            .set_secret(
                "vault1",
                "my-secret",
                SetSecretRequest {
                    value: "v1".to_string(),
                    content_type: None,
                    attributes: Some(attrs),
                    tags: None,
                },
            )
            .await
            .unwrap();
        let version = bundle.id.rsplit('/').next().unwrap().to_string();

        let updated = engine
            .update_secret_properties(
                "vault1",
                "my-secret",
                &version,
                UpdateSecretRequest {
                    content_type: Some("text/plain".to_string()),
                    attributes: None,
                    tags: None,
                },
            )
            .await
            .unwrap();
        assert!(!updated.attributes.enabled);
        assert_eq!(updated.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn patching_attributes_without_enabled_leaves_enabled_untouched() {
        use crate::keyvault::models::{SecretAttributesPatch, UpdateSecretRequest};

        let engine = KeyVaultEngine::new(true, 90);
        let attrs = SecretAttributes {
            enabled: false,
            ..SecretAttributes::default()
        };
        let bundle = engine
            .set_secret(
                "vault1",
                "my-secret",
                SetSecretRequest {
                    value: "v1".to_string(),
                    content_type: None,
                    attributes: Some(attrs),
                    tags: None,
                },
            )
            .await
            .unwrap();
        let version = bundle.id.rsplit('/').next().unwrap().to_string();

        let updated = engine
            .update_secret_properties(
                "vault1",
                "my-secret",
                &version,
                UpdateSecretRequest {
                    content_type: None,
                    attributes: Some(SecretAttributesPatch {
                        enabled: None,
                        not_before: None,
                        expires: Some(Utc::now()),
                    }),
                    tags: None,
                },
            )
            .await
            .unwrap();
        assert!(!updated.attributes.enabled);
        assert!(updated.attributes.expires.is_some());
    }
}
