// Cache adapter: a thin get/set-with-ttl wrapper over an external key-value
// store. Errors from the backing store are never fatal to a request -- a
// `get` error degrades to a miss, a `set` error is logged and swallowed.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// The value stored under a cache key: enough to replay a response verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the raw bytes for `key`, or `None` on miss or backend error.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    /// Stores `value` under `key` with the given TTL in seconds. A TTL of 0
    /// is a no-op. Backend errors are logged and swallowed.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64);
}

pub type SharedCacheStore = Arc<dyn CacheStore>;

/// `redis::aio::ConnectionManager`-backed store, the production default.
pub struct RedisCacheStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(v) => v,
            Err(e) => {
                error!(component = "cache", event = "get_failed", key, error = %e, "cache get failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) {
        if ttl_secs == 0 {
            return;
        }
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            error!(component = "cache", event = "set_failed", key, error = %e, "cache set failed");
        }
    }
}

/// In-memory store used by the standalone binary without a configured Redis
/// and by tests. Expiry is checked lazily on read.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, (Vec<u8>, Option<Instant>)>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if expires_at.map(|at| Instant::now() >= at).unwrap_or(false) {
                    drop(entry);
                    self.entries.remove(key);
                    None
                } else {
                    Some(value.clone())
                }
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) {
        if ttl_secs == 0 {
            return;
        }
        let expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        self.entries.insert(key.to_string(), (value, expires_at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let store = InMemoryCacheStore::new();
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn roundtrip_within_ttl() {
        let store = InMemoryCacheStore::new();
        store.set("k", b"v".to_vec(), 60).await;
        assert_eq!(store.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn zero_ttl_set_is_noop() {
        let store = InMemoryCacheStore::new();
        store.set("k", b"v".to_vec(), 0).await;
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let store = InMemoryCacheStore::new();
        store.set("k", b"v".to_vec(), 1).await;
        // Force-expire by directly overwriting with an already-elapsed deadline.
        store
            .entries
            .insert("k".to_string(), (b"v".to_vec(), Some(Instant::now() - Duration::from_secs(1))));
        assert!(store.get("k").await.is_none());
    }
}
