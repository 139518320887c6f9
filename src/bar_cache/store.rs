// =============================================================================
// BarCacheStore — the storage abstraction behind the stampede protocol
// =============================================================================
//
// `BarCache` (mod.rs) never talks to Redis or a `HashMap` directly; it talks
// to this trait. `MemoryStore` backs single-process deployments and the test
// suite; `RedisStore` is the real "shared across workers" implementation,
// grounded in the pack's `nautilus-infrastructure` crate (the one example
// repo that wires Redis for exactly this kind of cross-process shared
// state) using `SET NX PX` for the exclusive build lock and `SETEX` for data
// and the pending sentinel.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Minimal async KV primitives the stampede protocol needs. All values are
/// opaque UTF-8 strings (the cache payload is itself base64 text, per
/// `compression::encode`).
#[async_trait]
pub trait BarCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    /// Set `key` to `value` only if it does not already exist, returning
    /// whether this call won the race.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

// =============================================================================
// MemoryStore
// =============================================================================

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Single-process store behind a `parking_lot::Mutex`. Expired entries are
/// swept lazily on access rather than by a background task, which is
/// sufficient for a process-local cache (the distributed case is
/// `RedisStore`, where expiry is the server's job).
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at > Instant::now()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarCacheStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut map = self.inner.lock();
        if let Some(entry) = map.get(key) {
            if Self::is_live(entry) {
                return Ok(Some(entry.value.clone()));
            }
            map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut map = self.inner.lock();
        map.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(key) {
            if Self::is_live(existing) {
                return Ok(false);
            }
        }
        map.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + ttl },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.inner.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

// =============================================================================
// RedisStore
// =============================================================================

/// Distributed store backed by a single shared `redis::aio::ConnectionManager`
/// (auto-reconnecting, cheap to clone). This is what makes the stampede
/// protocol actually cross-process: two worker nodes racing `set_nx` on the
/// same key are arbitrated by Redis, not by a process-local mutex.
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl BarCacheStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let v: bool = conn.exists(key).await?;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_wins_once() {
        let store = MemoryStore::new();
        let first = store.set_nx("lock:a", "holder-1", Duration::from_secs(60)).await.unwrap();
        let second = store.set_nx("lock:a", "holder-2", Duration::from_secs(60)).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_absent() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn del_removes_key() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        store.del("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }
}
