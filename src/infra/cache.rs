//! Get-or-populate cache fronting read queries.
//!
//! Entries are keyed by logical query signature and removed explicitly by
//! projection handlers; otherwise they expire passively with an absolute
//! deadline plus a sliding window refreshed on hits. There is no single
//! flight guarantee: concurrent misses for the same key may both invoke the
//! factory, an accepted design choice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::{Config, CACHE_ABSOLUTE_TTL_SECONDS, CACHE_SLIDING_TTL_SECONDS};
use crate::errors::{AppError, AppResult};
use crate::infra::read_store::UserQueryModel;

/// Minimal key/value backend behind the cache front.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()>;
    /// Unconditional removal; returns whether the key existed.
    async fn remove(&self, key: &str) -> AppResult<bool>;
}

/// Redis backend with connection pooling.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
}

impl RedisBackend {
    /// Create a new backend and connect to Redis.
    ///
    /// # Panics
    /// Panics if Redis connection fails.
    pub async fn connect(config: &Config) -> Self {
        let client = Client::open(config.redis_url.as_str()).expect("Failed to create Redis client");
        let connection = ConnectionManager::new(client)
            .await
            .expect("Failed to connect to Redis");

        tracing::info!("Redis cache connected");
        Self { connection }
    }

    /// Try to connect to Redis, returning an error instead of panicking.
    pub async fn try_connect(config: &Config) -> Result<Self, RedisError> {
        let client = Client::open(config.redis_url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(cache_error)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await.map_err(cache_error)?;
        Ok(removed > 0)
    }
}

/// Convert Redis error to AppError.
fn cache_error(e: RedisError) -> AppError {
    tracing::error!("Redis error: {}", e);
    AppError::Cache(e.to_string())
}

/// Values that may opt out of being cached: empty or absent query results
/// are recomputed on the next read instead of being stored.
pub trait CacheValue {
    fn should_cache(&self) -> bool {
        true
    }
}

impl<T> CacheValue for Option<T> {
    fn should_cache(&self) -> bool {
        self.is_some()
    }
}

impl<T> CacheValue for Vec<T> {
    fn should_cache(&self) -> bool {
        !self.is_empty()
    }
}

impl CacheValue for UserQueryModel {}

/// Stored entry envelope. The absolute deadline rides along so sliding
/// refreshes can never push an entry past its absolute expiration.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

/// Typed cache front over a `CacheBackend`.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    absolute_ttl: Duration,
    sliding_ttl: Duration,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_expirations(
            backend,
            Duration::from_secs(CACHE_ABSOLUTE_TTL_SECONDS),
            Duration::from_secs(CACHE_SLIDING_TTL_SECONDS),
        )
    }

    pub fn with_expirations(
        backend: Arc<dyn CacheBackend>,
        absolute_ttl: Duration,
        sliding_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            absolute_ttl,
            sliding_ttl,
        }
    }

    /// On hit, return the cached value and refresh the sliding window. On
    /// miss, invoke the factory and cache the result when it is non-empty.
    pub async fn get_or_create<T, F, Fut>(&self, key: &str, factory: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned + CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(raw) = self.backend.get(key).await? {
            match serde_json::from_str::<Envelope<T>>(&raw) {
                Ok(envelope) => {
                    let remaining = envelope.expires_at - Utc::now();
                    if remaining > chrono::Duration::zero() {
                        tracing::debug!(key = %key, "cache hit");
                        let refresh = self
                            .sliding_ttl
                            .min(remaining.to_std().unwrap_or(self.sliding_ttl));
                        // the hit already has its value; a failed sliding
                        // refresh only shortens the entry's life
                        if let Err(e) = self.backend.expire(key, refresh).await {
                            tracing::warn!(key = %key, error = %e, "sliding refresh failed");
                        }
                        return Ok(envelope.value);
                    }
                    // absolute deadline passed, repopulate
                    self.backend.remove(key).await?;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dropping undecodable cache entry");
                    self.backend.remove(key).await?;
                }
            }
        }

        let value = factory().await?;
        if value.should_cache() {
            let envelope = Envelope {
                value,
                expires_at: Utc::now() + chrono::Duration::seconds(self.absolute_ttl.as_secs() as i64),
            };
            let raw = serde_json::to_string(&envelope)?;
            self.backend
                .set(key, raw, self.sliding_ttl.min(self.absolute_ttl))
                .await?;
            tracing::debug!(key = %key, "cache fill");
            Ok(envelope.value)
        } else {
            Ok(value)
        }
    }

    /// Remove one or more entries unconditionally.
    pub async fn remove(&self, keys: &[String]) -> AppResult<()> {
        for key in keys {
            let removed = self.backend.remove(key).await?;
            tracing::debug!(key = %key, removed, "cache entry invalidated");
        }
        Ok(())
    }
}

/// In-process backend used by the test-suite and local development.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
            entry.1 = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn memory_cache() -> Cache {
        Cache::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn miss_fills_then_hit_skips_factory() {
        let cache = memory_cache();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value: Vec<String> = cache
                .get_or_create("list", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["a".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["a".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let cache = memory_cache();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let value: Vec<String> = cache
                .get_or_create("empty", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                })
                .await
                .unwrap();
            assert!(value.is_empty());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn none_results_are_not_cached() {
        let cache = memory_cache();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let value: Option<String> = cache
                .get_or_create("missing", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert!(value.is_none());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Backend that serves reads and writes but cannot refresh TTLs.
    struct BrokenExpire(MemoryBackend);

    #[async_trait]
    impl CacheBackend for BrokenExpire {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
            self.0.set(key, value, ttl).await
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> AppResult<()> {
            Err(AppError::Cache("EXPIRE refused".to_string()))
        }

        async fn remove(&self, key: &str) -> AppResult<bool> {
            self.0.remove(key).await
        }
    }

    #[tokio::test]
    async fn failed_sliding_refresh_still_serves_the_hit() {
        let cache = Cache::new(Arc::new(BrokenExpire(MemoryBackend::new())));
        let calls = AtomicU32::new(0);

        let fill = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("value".to_string()))
        };

        let _: Option<String> = cache.get_or_create("key", fill).await.unwrap();
        // hit path: the refresh fails but the cached value is returned
        let second: Option<String> = cache.get_or_create("key", fill).await.unwrap();

        assert_eq!(second.as_deref(), Some("value"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_forces_repopulation() {
        let cache = memory_cache();
        let calls = AtomicU32::new(0);

        let fill = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("value".to_string()))
        };

        let _: Option<String> = cache.get_or_create("key", fill).await.unwrap();
        cache.remove(&["key".to_string()]).await.unwrap();
        let _: Option<String> = cache.get_or_create("key", fill).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
