//! Expiring key-value store backing the single-use login codes.
//!
//! The core never touches a concrete store type; `CodeAuthentication` takes a
//! `TtlStore` injected at construction. The in-process `MemoryStore` keeps
//! entries in a `DashMap` with absolute deadlines, expiring lazily on read
//! and in bulk from the periodic sweep. An external store (e.g. Redis) can
//! implement the same trait; its transport failures map to
//! `StoreError::Unavailable`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Drop every entry past its deadline. Called from the expiry sweep.
    async fn purge_expired(&self) -> Result<(), StoreError>;
}

struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// In-process `TtlStore`.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        // remove_if holds the shard lock, so an expired entry is evicted
        // atomically rather than read half-dead.
        self.entries.remove_if(key, |_, v| v.is_expired());
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<(), StoreError> {
        self.entries.retain(|_, v| !v.is_expired());
        Ok(())
    }
}
