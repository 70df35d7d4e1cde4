//! State backend abstraction (§4.B): a namespaced key-value store with TTL,
//! batch operations, glob-pattern listing and atomic transactions, available
//! in an in-memory flavor and a Redis-backed flavor behind one enum so the
//! rest of the crate never has to care which is active.

pub mod memory;
pub mod redis_backend;

use std::collections::HashMap;

use serde_json::Value;

use crate::config::Config;
use crate::error::StateBackendError;
use memory::{MemoryBackend, MemoryTransaction};
use redis_backend::{RedisBackend, RedisConfig, RedisTransaction};

/// The active state backend. Dispatches to the concrete implementation by
/// hand, the same way the teacher's secret store enum avoids `dyn Trait`
/// over `async fn`.
#[derive(Debug)]
pub enum Backend {
    InMemory(MemoryBackend),
    Redis(Box<RedisBackend>),
}

impl Backend {
    /// Builds the backend selected by configuration: Redis when
    /// `redis_url` is set, in-memory otherwise.
    pub async fn from_config(config: &Config) -> Result<Self, StateBackendError> {
        match &config.redis_url {
            Some(url) => {
                let backend = RedisBackend::connect(RedisConfig {
                    url: url.clone(),
                    key_prefix: config.redis_key_prefix.clone(),
                    max_retries: config.redis_max_retries,
                    retry_base_delay_ms: config.redis_retry_base_delay_ms,
                })
                .await?;
                Ok(Backend::Redis(Box::new(backend)))
            }
            None => Ok(Backend::InMemory(MemoryBackend::new())),
        }
    }

    pub async fn get(
        &self,
        ns: &str,
        key: &str,
        default: Option<Value>,
    ) -> Result<Option<Value>, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.get(ns, key, default).await,
            Backend::Redis(b) => b.get(ns, key, default).await,
        }
    }

    pub async fn set(
        &self,
        ns: &str,
        key: &str,
        value: Value,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        match self {
            Backend::InMemory(b) => b.set(ns, key, value, ttl).await,
            Backend::Redis(b) => b.set(ns, key, value, ttl).await,
        }
    }

    pub async fn delete(&self, ns: &str, key: &str) -> Result<bool, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.delete(ns, key).await,
            Backend::Redis(b) => b.delete(ns, key).await,
        }
    }

    pub async fn list(
        &self,
        ns: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.list(ns, pattern).await,
            Backend::Redis(b) => b.list(ns, pattern).await,
        }
    }

    pub async fn batch_get(
        &self,
        ns: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Value>, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.batch_get(ns, keys).await,
            Backend::Redis(b) => b.batch_get(ns, keys).await,
        }
    }

    pub async fn batch_set(
        &self,
        ns: &str,
        items: HashMap<String, Value>,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        match self {
            Backend::InMemory(b) => b.batch_set(ns, items, ttl).await,
            Backend::Redis(b) => b.batch_set(ns, items, ttl).await,
        }
    }

    pub async fn clear_namespace(&self, ns: &str) -> Result<usize, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.clear_namespace(ns).await,
            Backend::Redis(b) => b.clear_namespace(ns).await,
        }
    }

    pub async fn exists(&self, ns: &str, key: &str) -> Result<bool, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.exists(ns, key).await,
            Backend::Redis(b) => b.exists(ns, key).await,
        }
    }

    pub async fn get_ttl(&self, ns: &str, key: &str) -> Result<Option<i64>, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.get_ttl(ns, key).await,
            Backend::Redis(b) => b.get_ttl(ns, key).await,
        }
    }

    pub async fn set_ttl(&self, ns: &str, key: &str, ttl: i64) -> Result<bool, StateBackendError> {
        match self {
            Backend::InMemory(b) => b.set_ttl(ns, key, ttl).await,
            Backend::Redis(b) => b.set_ttl(ns, key, ttl).await,
        }
    }

    pub async fn namespaces(&self) -> Result<Vec<String>, StateBackendError> {
        match self {
            Backend::InMemory(b) => Ok(b.namespaces().await),
            Backend::Redis(b) => b.namespaces().await,
        }
    }

    pub async fn transaction(&self, ns: &str) -> Transaction<'_> {
        match self {
            Backend::InMemory(b) => Transaction::InMemory(MemoryTransaction::open(b, ns).await),
            Backend::Redis(b) => Transaction::Redis(RedisTransaction::open(b, ns)),
        }
    }
}

/// An open transaction against a namespace. Buffers writes; reads bypass
/// the buffer and see live backend state (§4.B).
#[derive(Debug)]
pub enum Transaction<'a> {
    InMemory(MemoryTransaction<'a>),
    Redis(RedisTransaction<'a>),
}

impl Transaction<'_> {
    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        match self {
            Transaction::InMemory(t) => t.set(key, value, ttl),
            Transaction::Redis(t) => t.set(key, value, ttl),
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<bool, StateBackendError> {
        match self {
            Transaction::InMemory(t) => t.delete(key),
            Transaction::Redis(t) => t.delete(key),
        }
    }

    pub async fn get(
        &self,
        key: &str,
        default: Option<Value>,
    ) -> Result<Option<Value>, StateBackendError> {
        match self {
            Transaction::InMemory(t) => t.get(key, default).await,
            Transaction::Redis(t) => t.get(key, default).await,
        }
    }

    pub async fn commit(self) -> Result<(), StateBackendError> {
        match self {
            Transaction::InMemory(t) => t.commit().await,
            Transaction::Redis(t) => t.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<(), StateBackendError> {
        match self {
            Transaction::InMemory(t) => t.rollback().await,
            Transaction::Redis(t) => t.rollback().await,
        }
    }
}
