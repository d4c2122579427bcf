//! Key/value cache and session store.
//!
//! [`CacheStore`] is the contract handlers program against; [`MemoryStore`] is
//! the in-process implementation used when no external store is plugged in.

use std::{
    collections::HashMap,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::RwLock, time::Instant};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// A string key/value store with optional per-entry expiry.
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key` with no expiry.
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-memory [`CacheStore`]. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until next touched.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn insert(&self, key: &str, value: String, expires_at: Option<Instant>) {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), Entry { value, expires_at });
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.insert(key, value, None).await;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert(key, value, Some(Instant::now() + ttl)).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
