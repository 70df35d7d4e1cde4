//! Snapshot/restore engine (§4.C): gzip-compressed, checksummed dumps of
//! every namespace in a state backend, restorable into a fresh or existing
//! backend with optional service filtering.
//!
//! The checksum is computed over a *canonical* JSON encoding (keys sorted,
//! compact separators) of the snapshot body with the checksum field itself
//! stripped, matching `json.dumps(..., sort_keys=True, separators=(',',':'))`
//! in the source implementation. The on-disk artifact is pretty-printed and
//! gzip-compressed; the checksum input is neither.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::SnapshotError;
use crate::state::Backend;

const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: String,
    pub timestamp: String,
    pub backend_type: String,
    pub namespaces: Vec<String>,
    pub total_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    metadata: SnapshotMetadata,
    data: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Dumps every namespace (or only those matching `services`) in `backend`
/// into a gzip-compressed JSON file at `path`.
pub async fn create_snapshot(
    backend: &Backend,
    backend_type: &str,
    services: Option<&[String]>,
) -> Result<Vec<u8>, SnapshotError> {
    let all_namespaces = backend.namespaces().await?;
    let namespaces: Vec<String> = match services {
        Some(services) => all_namespaces
            .into_iter()
            .filter(|ns| matches_service(ns, services))
            .collect(),
        None => all_namespaces,
    };

    let mut data = BTreeMap::new();
    let mut total_keys = 0usize;
    for ns in &namespaces {
        let keys = backend.list(ns, None).await?;
        let values = backend.batch_get(ns, &keys).await?;
        total_keys += values.len();
        data.insert(ns.clone(), values.into_iter().collect());
    }

    let metadata = SnapshotMetadata {
        version: SNAPSHOT_VERSION.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        backend_type: backend_type.to_string(),
        namespaces: namespaces.clone(),
        total_keys,
        checksum: None,
        partial: services.is_some(),
        services: services.map(<[std::string::String]>::to_vec),
    };

    let checksum = compute_checksum(&metadata, &data)?;
    let metadata = SnapshotMetadata {
        checksum: Some(format!("sha256:{checksum}")),
        ..metadata
    };

    let file = SnapshotFile { metadata, data };
    let pretty = serde_json::to_vec_pretty(&file).map_err(|e| SnapshotError::Io(e.to_string()))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&pretty)
        .map_err(|e| SnapshotError::Io(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| SnapshotError::Io(e.to_string()))
}

/// Restores a snapshot produced by [`create_snapshot`] into `backend`.
/// When `clear_existing` is set, every namespace present in the snapshot
/// is cleared before being repopulated.
pub async fn restore_snapshot(
    backend: &Backend,
    snapshot_bytes: &[u8],
    clear_existing: bool,
    verify_checksum: bool,
) -> Result<SnapshotMetadata, SnapshotError> {
    let file = load_snapshot(snapshot_bytes)?;

    if file.metadata.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(file.metadata.version));
    }

    if verify_checksum {
        if let Some(stored) = &file.metadata.checksum {
            let stripped = SnapshotMetadata {
                checksum: None,
                ..file.metadata.clone()
            };
            let calculated = format!("sha256:{}", compute_checksum(&stripped, &file.data)?);
            if &calculated != stored {
                return Err(SnapshotError::ChecksumMismatch {
                    stored: stored.clone(),
                    calculated,
                });
            }
        }
    }

    if clear_existing {
        for ns in &file.metadata.namespaces {
            backend.clear_namespace(ns).await?;
        }
    }

    for (ns, entries) in &file.data {
        let items: HashMap<String, Value> = entries.clone().into_iter().collect();
        backend.batch_set(ns, items, None).await?;
    }

    Ok(file.metadata)
}

/// Validates a snapshot's structure and (optionally) its checksum without
/// restoring it.
pub fn validate_snapshot(snapshot_bytes: &[u8]) -> Result<SnapshotMetadata, SnapshotError> {
    let file = load_snapshot(snapshot_bytes)?;
    if file.metadata.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(file.metadata.version));
    }
    if let Some(stored) = &file.metadata.checksum {
        let stripped = SnapshotMetadata {
            checksum: None,
            ..file.metadata.clone()
        };
        let calculated = format!("sha256:{}", compute_checksum(&stripped, &file.data)?);
        if &calculated != stored {
            return Err(SnapshotError::ChecksumMismatch {
                stored: stored.clone(),
                calculated,
            });
        }
    }
    Ok(file.metadata)
}

pub fn list_namespaces(snapshot_bytes: &[u8]) -> Result<Vec<String>, SnapshotError> {
    Ok(load_snapshot(snapshot_bytes)?.metadata.namespaces)
}

fn load_snapshot(snapshot_bytes: &[u8]) -> Result<SnapshotFile, SnapshotError> {
    let mut decoder = GzDecoder::new(snapshot_bytes);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| SnapshotError::Io(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| SnapshotError::Io(e.to_string()))
}

/// A namespace matches a service filter if it equals the service name, or
/// starts with `<service>:` or `service:<service>`, matching the source's
/// three-way `_get_all_namespaces` comparison.
fn matches_service(namespace: &str, services: &[String]) -> bool {
    services.iter().any(|service| {
        namespace == service
            || namespace.starts_with(&format!("{service}:"))
            || namespace.starts_with(&format!("service:{service}"))
    })
}

fn compute_checksum(
    metadata: &SnapshotMetadata,
    data: &BTreeMap<String, BTreeMap<String, Value>>,
) -> Result<String, SnapshotError> {
    let file = SnapshotFile {
        metadata: metadata.clone(),
        data: data.clone(),
    };
    let canonical = canonical_json(&file).map_err(|e| SnapshotError::Io(e.to_string()))?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(digest.iter().fold(String::new(), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    }))
}

/// Serializes to JSON with sorted keys and no insignificant whitespace,
/// matching Python's `sort_keys=True, separators=(',', ':')`.
fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value: Value = serde_json::to_value(value)?;
    Ok(canonical_value(&value))
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap(),
                        canonical_value(v)
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", body.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_round_trips_through_restore() {
        let backend = Backend::from_config(&Config::default()).await.unwrap();
        backend
            .set("ns1", "a", json!("value-a"), None)
            .await
            .unwrap();
        backend.set("ns1", "b", json!(42), None).await.unwrap();

        let snapshot = create_snapshot(&backend, "memory", None).await.unwrap();
        let restored_backend = Backend::from_config(&Config::default()).await.unwrap();
        let metadata = restore_snapshot(&restored_backend, &snapshot, true, true)
            .await
            .unwrap();

        assert_eq!(metadata.total_keys, 2);
        assert_eq!(
            restored_backend.get("ns1", "a", None).await.unwrap(),
            Some(json!("value-a"))
        );
        assert_eq!(
            restored_backend.get("ns1", "b", None).await.unwrap(),
            Some(json!(42))
        );
    }

    #[tokio::test]
    async fn tampered_snapshot_fails_checksum_verification() {
        let backend = Backend::from_config(&Config::default()).await.unwrap();
        backend
            .set("ns1", "a", json!("value-a"), None)
            .await
            .unwrap();
        let snapshot = create_snapshot(&backend, "memory", None).await.unwrap();

        let mut file = load_snapshot(&snapshot).unwrap();
        file.data
            .get_mut("ns1")
            .unwrap()
            .insert("a".to_string(), json!("tampered"));
        let tampered = serde_json::to_vec(&file).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tampered).unwrap();
        let tampered_gz = encoder.finish().unwrap();

        let result = validate_snapshot(&tampered_gz);
        assert!(matches!(
            result,
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn service_filter_keeps_only_matching_namespaces() {
        let backend = Backend::from_config(&Config::default()).await.unwrap();
        backend
            .set("keyvault", "a", json!("v"), None)
            .await
            .unwrap();
        backend
            .set("oauth:tokens", "b", json!("v"), None)
            .await
            .unwrap();

        let snapshot = create_snapshot(&backend, "memory", Some(&["keyvault".to_string()]))
            .await
            .unwrap();
        let namespaces = list_namespaces(&snapshot).unwrap();
        assert_eq!(namespaces, vec!["keyvault".to_string()]);
    }
}
