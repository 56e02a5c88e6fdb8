use anyhow::Result;
use async_trait::async_trait;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const KV_MAX_ENTRIES: u64 = 100_000;

/// Narrow interface over the external key-value store. Sessions, analytics
/// events, and analysis caches all go through this; backends are pluggable.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Put a value with an optional TTL. A put always rewrites the TTL.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys with the given prefix. Order is unspecified.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Narrow interface over the image blob store: bytes in, bytes out.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

#[derive(Clone)]
struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory KV with per-entry TTL, standing in for the external store.
pub struct MemoryKv {
    cache: Cache<String, KvEntry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().max_capacity(KV_MAX_ENTRIES).build(),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.cache.get(key) {
            Some(entry) if entry.expired() => {
                self.cache.invalidate(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let entry = KvEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.cache.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && !v.expired())
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory blob store backing the `/images/{slug}/{id}.png` route.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}
