//! In-memory state backend.
//!
//! Fastest implementation, backed by nested `HashMap`s under a single
//! `tokio::sync::Mutex`. Read paths also take the lock so lazy TTL
//! eviction is safe (§4.B concurrency note).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::StateBackendError;
use crate::serializer;

/// `(serialized value, expiry unix-seconds or none)`.
type Entry = (Vec<u8>, Option<f64>);

#[derive(Debug, Default)]
pub struct MemoryBackend {
    storage: Mutex<HashMap<String, HashMap<String, Entry>>>,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs_f64()
}

fn is_expired(expiry: Option<f64>) -> bool {
    match expiry {
        Some(e) => now_secs() > e,
        None => false,
    }
}

fn decode(data: &[u8]) -> Result<Value, StateBackendError> {
    match serializer::deserialize(data)? {
        serializer::Decoded::Json(v) => Ok(v),
        // Every value stored through this backend's own API round-trips as
        // JSON; an opaque payload here means the wire format was stamped
        // by a different caller. Surface it as a lossy string rather than
        // failing the read outright.
        serializer::Decoded::Opaque(bytes) => {
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(
        &self,
        ns: &str,
        key: &str,
        default: Option<Value>,
    ) -> Result<Option<Value>, StateBackendError> {
        let mut storage = self.storage.lock().await;
        let Some(namespace) = storage.get_mut(ns) else {
            return Ok(default);
        };
        let Some(&(ref data, expiry)) = namespace.get(key) else {
            return Ok(default);
        };
        if is_expired(expiry) {
            namespace.remove(key);
            return Ok(default);
        }
        Ok(Some(decode(data)?))
    }

    pub async fn set(
        &self,
        ns: &str,
        key: &str,
        value: Value,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        let data = serializer::serialize(&value)?;
        let expiry = ttl.filter(|&t| t > 0).map(|t| now_secs() + t as f64);
        let mut storage = self.storage.lock().await;
        storage
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_string(), (data, expiry));
        Ok(())
    }

    pub async fn delete(&self, ns: &str, key: &str) -> Result<bool, StateBackendError> {
        let mut storage = self.storage.lock().await;
        Ok(storage
            .get_mut(ns)
            .is_some_and(|namespace| namespace.remove(key).is_some()))
    }

    pub async fn list(
        &self,
        ns: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, StateBackendError> {
        let mut storage = self.storage.lock().await;
        let Some(namespace) = storage.get_mut(ns) else {
            return Ok(Vec::new());
        };
        let expired: Vec<String> = namespace
            .iter()
            .filter(|(_, &(_, expiry))| is_expired(expiry))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            namespace.remove(key);
        }
        let mut keys: Vec<String> = namespace.keys().cloned().collect();
        if let Some(pattern) = pattern {
            let glob = glob::Pattern::new(pattern)
                .map_err(|e| StateBackendError::Backend(e.to_string()))?;
            keys.retain(|k| glob.matches(k));
        }
        Ok(keys)
    }

    pub async fn batch_get(
        &self,
        ns: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Value>, StateBackendError> {
        let mut result = HashMap::new();
        let storage = self.storage.lock().await;
        let Some(namespace) = storage.get(ns) else {
            return Ok(result);
        };
        for key in keys {
            if let Some(&(ref data, expiry)) = namespace.get(key) {
                if !is_expired(expiry) {
                    result.insert(key.clone(), decode(data)?);
                }
            }
        }
        Ok(result)
    }

    pub async fn batch_set(
        &self,
        ns: &str,
        items: HashMap<String, Value>,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        let mut serialized = HashMap::with_capacity(items.len());
        for (k, v) in items {
            serialized.insert(k, serializer::serialize(&v)?);
        }
        let expiry = ttl.filter(|&t| t > 0).map(|t| now_secs() + t as f64);
        let mut storage = self.storage.lock().await;
        let namespace = storage.entry(ns.to_string()).or_default();
        for (key, data) in serialized {
            namespace.insert(key, (data, expiry));
        }
        Ok(())
    }

    pub async fn clear_namespace(&self, ns: &str) -> Result<usize, StateBackendError> {
        let mut storage = self.storage.lock().await;
        Ok(storage.remove(ns).map_or(0, |n| n.len()))
    }

    pub async fn exists(&self, ns: &str, key: &str) -> Result<bool, StateBackendError> {
        let mut storage = self.storage.lock().await;
        let Some(namespace) = storage.get_mut(ns) else {
            return Ok(false);
        };
        match namespace.get(key) {
            Some(&(_, expiry)) if is_expired(expiry) => {
                namespace.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    pub async fn get_ttl(&self, ns: &str, key: &str) -> Result<Option<i64>, StateBackendError> {
        let mut storage = self.storage.lock().await;
        let namespace = storage
            .get_mut(ns)
            .ok_or_else(|| StateBackendError::KeyNotFound(key.to_string()))?;
        let &(_, expiry) = namespace
            .get(key)
            .ok_or_else(|| StateBackendError::KeyNotFound(key.to_string()))?;
        let Some(expiry) = expiry else {
            return Ok(None);
        };
        let remaining = expiry - now_secs();
        if remaining <= 0.0 {
            namespace.remove(key);
            return Err(StateBackendError::KeyNotFound(key.to_string()));
        }
        Ok(Some(remaining as i64))
    }

    pub async fn set_ttl(&self, ns: &str, key: &str, ttl: i64) -> Result<bool, StateBackendError> {
        let mut storage = self.storage.lock().await;
        let Some(namespace) = storage.get_mut(ns) else {
            return Ok(false);
        };
        let Some(&(ref data, expiry)) = namespace.get(key) else {
            return Ok(false);
        };
        if is_expired(expiry) {
            namespace.remove(key);
            return Ok(false);
        }
        let new_expiry = (ttl > 0).then(|| now_secs() + ttl as f64);
        namespace.insert(key.to_string(), (data.clone(), new_expiry));
        Ok(true)
    }

    pub async fn namespaces(&self) -> Vec<String> {
        self.storage.lock().await.keys().cloned().collect()
    }

    /// Snapshots the namespace's raw entries, for transaction rollback.
    pub(super) async fn snapshot_namespace(&self, ns: &str) -> HashMap<String, Entry> {
        self.storage
            .lock()
            .await
            .get(ns)
            .cloned()
            .unwrap_or_default()
    }

    /// Restores a namespace to a prior snapshot, or removes it entirely if
    /// the snapshot was empty (the namespace didn't exist before the
    /// transaction started).
    pub(super) async fn restore_namespace(&self, ns: &str, snapshot: HashMap<String, Entry>) {
        let mut storage = self.storage.lock().await;
        if snapshot.is_empty() {
            storage.remove(ns);
        } else {
            storage.insert(ns.to_string(), snapshot);
        }
    }

    pub(super) async fn apply_set(
        &self,
        ns: &str,
        key: &str,
        value: Value,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        self.set(ns, key, value, ttl).await
    }

    pub(super) async fn apply_delete(&self, ns: &str, key: &str) {
        let mut storage = self.storage.lock().await;
        if let Some(namespace) = storage.get_mut(ns) {
            namespace.remove(key);
        }
    }
}

/// One buffered mutation inside an open transaction.
#[derive(Debug)]
enum MemoryOp {
    Set(String, Value, Option<i64>),
    Delete(String),
}

/// Transaction proxy for the in-memory backend.
///
/// Records operations without applying them; `commit` replays them
/// atomically under the backend's lock, `rollback` restores the namespace
/// snapshot taken at open time. Reads bypass the buffered operations
/// entirely and see live committed state (§4.B: "reads are not
/// transactional").
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    backend: &'a MemoryBackend,
    namespace: String,
    ops: Vec<MemoryOp>,
    snapshot: HashMap<String, Entry>,
    closed: bool,
}

impl<'a> MemoryTransaction<'a> {
    pub(super) async fn open(backend: &'a MemoryBackend, namespace: &str) -> Self {
        let snapshot = backend.snapshot_namespace(namespace).await;
        Self {
            backend,
            namespace: namespace.to_string(),
            ops: Vec::new(),
            snapshot,
            closed: false,
        }
    }

    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        self.ensure_open()?;
        self.ops.push(MemoryOp::Set(key.to_string(), value, ttl));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<bool, StateBackendError> {
        self.ensure_open()?;
        self.ops.push(MemoryOp::Delete(key.to_string()));
        Ok(true)
    }

    pub async fn get(
        &self,
        key: &str,
        default: Option<Value>,
    ) -> Result<Option<Value>, StateBackendError> {
        self.backend.get(&self.namespace, key, default).await
    }

    pub async fn commit(mut self) -> Result<(), StateBackendError> {
        self.ensure_open()?;
        for op in self.ops.drain(..) {
            match op {
                MemoryOp::Set(key, value, ttl) => {
                    self.backend
                        .apply_set(&self.namespace, &key, value, ttl)
                        .await?;
                }
                MemoryOp::Delete(key) => {
                    self.backend.apply_delete(&self.namespace, &key).await;
                }
            }
        }
        self.closed = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), StateBackendError> {
        self.ensure_open()?;
        self.backend
            .restore_namespace(&self.namespace, std::mem::take(&mut self.snapshot))
            .await;
        self.closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StateBackendError> {
        if self.closed {
            Err(StateBackendError::Transaction(
                "transaction already committed or rolled back".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn transaction_commit_applies_buffered_ops_atomically() {
        let backend = MemoryBackend::new();
        backend.set("ns", "existing", json!(1), None).await.unwrap();

        let mut txn = MemoryTransaction::open(&backend, "ns").await;
        txn.set("a", json!("x"), None).unwrap();
        txn.delete("existing").unwrap();
        txn.commit().await.unwrap();

        assert_eq!(
            backend.get("ns", "a", None).await.unwrap(),
            Some(json!("x"))
        );
        assert_eq!(backend.get("ns", "existing", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn transaction_rollback_discards_buffered_ops() {
        let backend = MemoryBackend::new();
        backend.set("ns", "existing", json!(1), None).await.unwrap();

        let mut txn = MemoryTransaction::open(&backend, "ns").await;
        txn.set("a", json!("x"), None).unwrap();
        txn.rollback().await.unwrap();

        assert_eq!(backend.get("ns", "a", None).await.unwrap(), None);
        assert_eq!(
            backend.get("ns", "existing", None).await.unwrap(),
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn transaction_reads_see_committed_state_not_pending_writes() {
        let backend = MemoryBackend::new();
        let mut txn = MemoryTransaction::open(&backend, "ns").await;
        txn.set("a", json!("pending"), None).unwrap();
        // Not yet committed: a read through the transaction sees live state.
        assert_eq!(txn.get("a", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rollback_undoes_namespace_creation_side_effect() {
        let backend = MemoryBackend::new();
        let mut txn = MemoryTransaction::open(&backend, "brand-new-ns").await;
        txn.set("a", json!("x"), None).unwrap();
        txn.rollback().await.unwrap();
        assert!(!backend
            .namespaces()
            .await
            .contains(&"brand-new-ns".to_string()));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let backend = MemoryBackend::new();
        backend.set("ns", "k", json!({"x": 1}), None).await.unwrap();
        assert_eq!(
            backend.get("ns", "k", None).await.unwrap(),
            Some(json!({"x": 1}))
        );
    }

    #[tokio::test]
    async fn expired_key_is_absent_to_every_reader() {
        let backend = MemoryBackend::new();
        backend.set("ns", "k", json!("v"), Some(-1)).await.unwrap();
        // ttl<=0 means "no TTL" per spec, so this key should never expire.
        assert_eq!(
            backend.get("ns", "k", None).await.unwrap(),
            Some(json!("v"))
        );

        backend.set("ns", "k2", json!("v"), Some(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(backend.get("ns", "k2", None).await.unwrap(), None);
        assert!(!backend.exists("ns", "k2").await.unwrap());
        assert!(!backend
            .list("ns", None)
            .await
            .unwrap()
            .contains(&"k2".to_string()));
    }

    #[tokio::test]
    async fn clear_namespace_removes_whole_namespace() {
        let backend = MemoryBackend::new();
        backend.set("ns", "k", json!(1), None).await.unwrap();
        backend.set("ns", "k2", json!(2), None).await.unwrap();
        assert_eq!(backend.clear_namespace("ns").await.unwrap(), 2);
        assert!(backend.namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn list_matches_glob_pattern() {
        let backend = MemoryBackend::new();
        backend.set("ns", "user:1", json!(1), None).await.unwrap();
        backend.set("ns", "user:2", json!(2), None).await.unwrap();
        backend.set("ns", "other", json!(3), None).await.unwrap();
        let mut keys = backend.list("ns", Some("user:*")).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[tokio::test]
    async fn get_ttl_errors_on_missing_key() {
        let backend = MemoryBackend::new();
        assert!(backend.get_ttl("ns", "missing").await.is_err());
    }

    #[tokio::test]
    async fn batch_get_silently_skips_missing_keys() {
        let backend = MemoryBackend::new();
        backend.set("ns", "k1", json!(1), None).await.unwrap();
        let result = backend
            .batch_get("ns", &["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("k1"), Some(&json!(1)));
    }
}
