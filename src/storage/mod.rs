//! Key-value persistence consumed by the connector
//!
//! The connector persists very little: the id of the selected wallet, the list of
//! debug manifests, and one connection marker per chain connector. Sandboxed
//! backends additionally get a private partition (see [`ScopedStorage`]).
//!
//! Concurrent writers to one key are last-write-wins; nothing here locks across calls.

mod file;

pub use file::FileStorage;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage key holding the id of the active backend
pub const SELECTED_WALLET_KEY: &str = "selected-wallet";
/// Storage key holding a JSON array of debug manifests
pub const DEBUG_WALLETS_KEY: &str = "debug-wallets";

/// Async string key-value store
#[async_trait]
pub trait DataStorage: Send + Sync {
    async fn get(&self, key: &str) -> crate::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> crate::Result<()>;
    async fn remove(&self, key: &str) -> crate::Result<()>;
}

/// In-process storage, lost on drop
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DataStorage for MemoryStorage {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> crate::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// A partition of a parent store, private to one wallet.
///
/// Keys are stored as `"<scope>:<key>"`. The partition keeps an index of the keys it
/// wrote under `"__index:<scope>"`, outside its own key space, so [`ScopedStorage::clear`]
/// can wipe it without the parent store supporting enumeration. An unreadable index is
/// treated as empty.
#[derive(Clone)]
pub struct ScopedStorage {
    scope: String,
    inner: Arc<dyn DataStorage>,
}

impl ScopedStorage {
    pub fn new(scope: impl Into<String>, inner: Arc<dyn DataStorage>) -> Self {
        Self {
            scope: scope.into(),
            inner,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.scope, key)
    }

    fn index_key(&self) -> String {
        format!("__index:{}", self.scope)
    }

    async fn load_index(&self) -> crate::Result<Vec<String>> {
        let Some(raw) = self.inner.get(&self.index_key()).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(keys) => Ok(keys),
            Err(e) => {
                tracing::warn!(scope = %self.scope, error = %e, "Discarding unreadable storage index");
                Ok(Vec::new())
            }
        }
    }

    async fn store_index(&self, keys: &[String]) -> crate::Result<()> {
        if keys.is_empty() {
            self.inner.remove(&self.index_key()).await
        } else {
            self.inner
                .set(&self.index_key(), &serde_json::to_string(keys)?)
                .await
        }
    }

    /// Remove every key written through this partition
    pub async fn clear(&self) -> crate::Result<()> {
        let keys = self.load_index().await?;
        for key in &keys {
            self.inner.remove(&self.full_key(key)).await?;
        }
        self.store_index(&[]).await?;
        tracing::debug!(scope = %self.scope, removed = keys.len(), "Cleared storage partition");
        Ok(())
    }
}

#[async_trait]
impl DataStorage for ScopedStorage {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        self.inner.get(&self.full_key(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        self.inner.set(&self.full_key(key), value).await?;
        let mut keys = self.load_index().await?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.store_index(&keys).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> crate::Result<()> {
        self.inner.remove(&self.full_key(key)).await?;
        let mut keys = self.load_index().await?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            self.store_index(&keys).await?;
        }
        Ok(())
    }
}
