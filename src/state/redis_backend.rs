//! Redis-backed state backend.
//!
//! Namespacing via key prefix (`<prefix><ns>:<key>`), `SCAN` for listing to
//! avoid blocking the single-threaded Redis command processor, pipelined
//! `MULTI/EXEC` for batch writes and transaction commits, and retried with
//! exponential backoff on transient connection/timeout faults (§4.B).

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

use crate::error::StateBackendError;
use crate::serializer::{self, Decoded};

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

pub struct RedisBackend {
    manager: ConnectionManager,
    config: RedisConfig,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    pub async fn connect(config: RedisConfig) -> Result<Self, StateBackendError> {
        let client = redis::Client::open(config.url.clone())
            .map_err(|e| StateBackendError::Backend(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StateBackendError::Backend(e.to_string()))?;
        Ok(Self { manager, config })
    }

    fn make_key(&self, ns: &str, key: &str) -> String {
        format!("{}{}:{}", self.config.key_prefix, ns, key)
    }

    fn scan_pattern(&self, ns: &str, pattern: Option<&str>) -> String {
        format!(
            "{}{}:{}",
            self.config.key_prefix,
            ns,
            pattern.unwrap_or("*")
        )
    }

    async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, StateBackendError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.config.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_timeout() || e.is_io_error() => {
                    last_err = Some(e);
                    if attempt + 1 < self.config.max_retries {
                        let delay = self.config.retry_base_delay_ms * 2u64.pow(attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
                Err(e) => return Err(StateBackendError::Backend(e.to_string())),
            }
        }
        Err(StateBackendError::Backend(format!(
            "redis operation failed after {} retries: {}",
            self.config.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn decode(data: Vec<u8>) -> Result<Value, StateBackendError> {
        match serializer::deserialize(&data)? {
            Decoded::Json(v) => Ok(v),
            Decoded::Opaque(bytes) => {
                Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
    }

    pub async fn get(
        &self,
        ns: &str,
        key: &str,
        default: Option<Value>,
    ) -> Result<Option<Value>, StateBackendError> {
        let redis_key = self.make_key(ns, key);
        let manager = self.manager.clone();
        let data: Option<Vec<u8>> = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_key = redis_key.clone();
                async move { conn.get(redis_key).await }
            })
            .await?;
        match data {
            Some(bytes) => Ok(Some(Self::decode(bytes)?)),
            None => Ok(default),
        }
    }

    pub async fn set(
        &self,
        ns: &str,
        key: &str,
        value: Value,
        ttl: Option<i64>,
    ) -> Result<(), StateBackendError> {
        let redis_key = self.make_key(ns, key);
        let data = serializer::serialize(&value)?;
        let manager = self.manager.clone();
        match ttl.filter(|&t| t > 0) {
            Some(ttl) => {
                self.retry(|| {
                    let mut conn = manager.clone();
                    let redis_key = redis_key.clone();
                    let data = data.clone();
                    async move { conn.set_ex::<_, _, ()>(redis_key, data, ttl as u64).await }
                })
                .await?;
            }
            None => {
                self.retry(|| {
                    let mut conn = manager.clone();
                    let redis_key = redis_key.clone();
                    let data = data.clone();
                    async move { conn.set::<_, _, ()>(redis_key, data).await }
                })
                .await?;
            }
        }
        Ok(())
    }

    pub async fn delete(&self, ns: &str, key: &str) -> Result<bool, StateBackendError> {
        let redis_key = self.make_key(ns, key);
        let manager = self.manager.clone();
        let removed: i64 = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_key = redis_key.clone();
                async move { conn.del(redis_key).await }
            })
            .await?;
        Ok(removed > 0)
    }

    pub async fn list(
        &self,
        ns: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, StateBackendError> {
        let scan_pattern = self.scan_pattern(ns, pattern);
        let prefix = format!("{}{}:", self.config.key_prefix, ns);
        let manager = self.manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = self
                .retry(|| {
                    let mut conn = manager.clone();
                    let scan_pattern = scan_pattern.clone();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&scan_pattern)
                            .arg("COUNT")
                            .arg(100)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;
            for redis_key in batch {
                if let Some(key) = redis_key.strip_prefix(&prefix) {
                    keys.push(key.to_string());
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    pub async fn batch_get(
        &self,
        ns: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Value>, StateBackendError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let redis_keys: Vec<String> = keys.iter().map(|k| self.make_key(ns, k)).collect();
        let manager = self.manager.clone();
        let values: Vec<Option<Vec<u8>>> = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_keys = redis_keys.clone();
                async move { conn.mget(redis_keys).await }
            })
            .await?;
        let mut result = HashMap::new();
        for (key, data) in keys.iter().zip(values) {
            if let Some(bytes) = data {
                result.insert(key.clone(), Self::decode(bytes)?);
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
        if items.is_empty() {
            return Ok(());
        }
        let ttl = ttl.filter(|&t| t > 0);
        let mut encoded = Vec::with_capacity(items.len());
        for (key, value) in items {
            encoded.push((self.make_key(ns, &key), serializer::serialize(&value)?));
        }
        let manager = self.manager.clone();
        self.retry(|| {
            let mut conn = manager.clone();
            let encoded = encoded.clone();
            async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                for (redis_key, data) in &encoded {
                    match ttl {
                        Some(ttl) => {
                            pipe.set_ex(redis_key, data, ttl as u64);
                        }
                        None => {
                            pipe.set(redis_key, data);
                        }
                    }
                }
                pipe.query_async::<()>(&mut conn).await
            }
        })
        .await
    }

    pub async fn clear_namespace(&self, ns: &str) -> Result<usize, StateBackendError> {
        let keys = self.list(ns, None).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let redis_keys: Vec<String> = keys.iter().map(|k| self.make_key(ns, k)).collect();
        let manager = self.manager.clone();
        let removed: i64 = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_keys = redis_keys.clone();
                async move { conn.del(redis_keys).await }
            })
            .await?;
        Ok(removed as usize)
    }

    pub async fn exists(&self, ns: &str, key: &str) -> Result<bool, StateBackendError> {
        let redis_key = self.make_key(ns, key);
        let manager = self.manager.clone();
        let count: i64 = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_key = redis_key.clone();
                async move { conn.exists(redis_key).await }
            })
            .await?;
        Ok(count > 0)
    }

    /// Distinguishes Redis's `TTL` sentinels: `-2` absent, `-1` no TTL,
    /// `>=0` remaining seconds (§4.B).
    pub async fn get_ttl(&self, ns: &str, key: &str) -> Result<Option<i64>, StateBackendError> {
        let redis_key = self.make_key(ns, key);
        let manager = self.manager.clone();
        let ttl: i64 = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_key = redis_key.clone();
                async move { conn.ttl(redis_key).await }
            })
            .await?;
        match ttl {
            -2 => Err(StateBackendError::KeyNotFound(key.to_string())),
            -1 => Ok(None),
            seconds => Ok(Some(seconds)),
        }
    }

    pub async fn set_ttl(&self, ns: &str, key: &str, ttl: i64) -> Result<bool, StateBackendError> {
        let redis_key = self.make_key(ns, key);
        let manager = self.manager.clone();
        let updated: bool = self
            .retry(|| {
                let mut conn = manager.clone();
                let redis_key = redis_key.clone();
                async move { conn.expire(redis_key, ttl).await }
            })
            .await?;
        Ok(updated)
    }

    /// Namespace enumeration has no native Redis primitive; this scans the
    /// prefix space once. Used only by the snapshot engine's full-namespace
    /// discovery, not on any hot path.
    pub async fn namespaces(&self) -> Result<Vec<String>, StateBackendError> {
        let pattern = format!("{}*", self.config.key_prefix);
        let manager = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut seen = std::collections::HashSet::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = self
                .retry(|| {
                    let mut conn = manager.clone();
                    let pattern = pattern.clone();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(100)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;
            for redis_key in batch {
                if let Some(rest) = redis_key.strip_prefix(&self.config.key_prefix) {
                    if let Some((ns, _)) = rest.split_once(':') {
                        seen.insert(ns.to_string());
                    }
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(seen.into_iter().collect())
    }
}

/// Transaction proxy for the Redis backend. Buffers `(op, key, value?, ttl?)`
/// tuples and replays them in a single `MULTI/EXEC` pipeline on commit;
/// rollback simply discards the buffer (Redis never saw the writes).
#[derive(Debug)]
pub struct RedisTransaction<'a> {
    backend: &'a RedisBackend,
    namespace: String,
    ops: Vec<RedisOp>,
    closed: bool,
}

#[derive(Debug)]
enum RedisOp {
    Set(String, Value, Option<i64>),
    Delete(String),
}

impl<'a> RedisTransaction<'a> {
    pub(super) fn open(backend: &'a RedisBackend, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
            ops: Vec::new(),
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
        self.ops.push(RedisOp::Set(key.to_string(), value, ttl));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<bool, StateBackendError> {
        self.ensure_open()?;
        self.ops.push(RedisOp::Delete(key.to_string()));
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
        if self.ops.is_empty() {
            self.closed = true;
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            match op {
                RedisOp::Set(key, value, ttl) => {
                    let redis_key = self.backend.make_key(&self.namespace, key);
                    let data = serializer::serialize(value)?;
                    encoded.push((redis_key, Some(data), ttl.filter(|&t| t > 0)));
                }
                RedisOp::Delete(key) => {
                    let redis_key = self.backend.make_key(&self.namespace, key);
                    encoded.push((redis_key, None, None));
                }
            }
        }
        let manager = self.backend.manager.clone();
        self.backend
            .retry(|| {
                let mut conn = manager.clone();
                let encoded = encoded.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    for (redis_key, data, ttl) in &encoded {
                        match data {
                            Some(data) => match ttl {
                                Some(ttl) => {
                                    pipe.set_ex(redis_key, data, *ttl as u64);
                                }
                                None => {
                                    pipe.set(redis_key, data);
                                }
                            },
                            None => {
                                pipe.del(redis_key);
                            }
                        }
                    }
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;
        self.closed = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), StateBackendError> {
        self.ensure_open()?;
        self.ops.clear();
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
