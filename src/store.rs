//! Key-value store adapter.
//!
//! Two independent partitions: `Local` for bulk data (situations, briefs)
//! and `Sync` for small data (settings). Each has its own quota and the
//! adapter never merges them. Values are JSON documents.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::error::StoreError;

pub const SITUATIONS_KEY: &str = "sidecar_situations";
pub const BRIEFS_KEY: &str = "sidecar_briefs";
pub const SETTINGS_KEY: &str = "sidecar_settings";

pub const LOCAL_QUOTA_BYTES: u64 = 10_485_760;
pub const SYNC_QUOTA_BYTES: u64 = 102_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Local,
    Sync,
}

impl Partition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sync => "sync",
        }
    }

    pub fn default_quota(self) -> u64 {
        match self {
            Self::Local => LOCAL_QUOTA_BYTES,
            Self::Sync => SYNC_QUOTA_BYTES,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes an entry counts against its partition quota.
pub fn entry_size(key: &str, serialized: &str) -> u64 {
    (key.len() + serialized.len()) as u64
}

/// Asynchronous get/set storage over named keys. Failures are returned to
/// the caller; there is no transaction spanning several keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, partition: Partition, key: &str, value: Value) -> Result<(), StoreError>;

    async fn clear(&self, partition: Partition) -> Result<(), StoreError>;

    async fn bytes_in_use(&self, partition: Partition) -> Result<u64, StoreError>;

    fn quota(&self, partition: Partition) -> u64;
}

/// In-process store. Entries are kept as serialized JSON text so quota
/// accounting matches what a persistent backend would hold.
pub struct MemoryStore {
    entries: RwLock<HashMap<Partition, BTreeMap<String, String>>>,
    local_quota: u64,
    sync_quota: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_quotas(LOCAL_QUOTA_BYTES, SYNC_QUOTA_BYTES)
    }

    pub fn with_quotas(local_quota: u64, sync_quota: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            local_quota,
            sync_quota,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().await;
        let Some(text) = entries.get(&partition).and_then(|p| p.get(key)) else {
            return Ok(None);
        };
        let value = serde_json::from_str(text).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    async fn set(&self, partition: Partition, key: &str, value: Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(&value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;

        let mut entries = self.entries.write().await;
        let bucket = entries.entry(partition).or_default();
        let others: u64 = bucket
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        let required = others + entry_size(key, &text);
        let quota = self.quota(partition);
        if required > quota {
            return Err(StoreError::QuotaExceeded {
                partition,
                required,
                quota,
            });
        }

        debug!(%partition, key, bytes = text.len(), "memory store set");
        bucket.insert(key.to_string(), text);
        Ok(())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StoreError> {
        self.entries.write().await.remove(&partition);
        Ok(())
    }

    async fn bytes_in_use(&self, partition: Partition) -> Result<u64, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&partition)
            .map(|bucket| bucket.iter().map(|(k, v)| entry_size(k, v)).sum())
            .unwrap_or(0))
    }

    fn quota(&self, partition: Partition) -> u64 {
        match partition {
            Partition::Local => self.local_quota,
            Partition::Sync => self.sync_quota,
        }
    }
}

type KeyLocks = DashMap<(Partition, String), Arc<Mutex<()>>>;

/// Shared handle the repositories use to reach the store.
///
/// Holds no cached data: every read goes back to the adapter. By default
/// read-modify-write cycles on the same key are serialized through a
/// per-key async mutex, so callers sharing a handle cannot lose each other's
/// updates. [`Storage::unserialized`] drops the locks and lets the last
/// `set` win.
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn KvStore>,
    locks: Option<Arc<KeyLocks>>,
}

impl Storage {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: Some(Arc::new(DashMap::new())),
        }
    }

    pub fn unserialized(store: Arc<dyn KvStore>) -> Self {
        Self { store, locks: None }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Hold the returned guard for the duration of a read-modify-write
    /// cycle. Not reentrant: never take the same key twice in one task.
    pub async fn lock(&self, partition: Partition, key: &str) -> Option<OwnedMutexGuard<()>> {
        let locks = self.locks.as_ref()?;
        let mutex = locks
            .entry((partition, key.to_string()))
            .or_default()
            .clone();
        Some(mutex.lock_owned().await)
    }

    /// Read and decode a key, falling back to `T::default()` when absent.
    pub async fn load<T>(&self, partition: Partition, key: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        match self.store.get(partition, key).await? {
            Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
            None => Ok(T::default()),
        }
    }

    pub async fn save<T>(&self, partition: Partition, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.store.set(partition, key, value).await
    }

    pub async fn load_raw(&self, partition: Partition, key: &str) -> Result<Option<Value>, StoreError> {
        self.store.get(partition, key).await
    }

    pub async fn save_raw(&self, partition: Partition, key: &str, value: Value) -> Result<(), StoreError> {
        self.store.set(partition, key, value).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn partitions_are_independent() {
        let store = MemoryStore::new();
        store
            .set(Partition::Local, "k", json!({"a": 1}))
            .await
            .unwrap();

        assert_eq!(store.get(Partition::Local, "k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get(Partition::Sync, "k").await.unwrap(), None);

        store.clear(Partition::Sync).await.unwrap();
        assert!(store.get(Partition::Local, "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bytes_in_use_counts_keys_and_values() {
        let store = MemoryStore::new();
        store.set(Partition::Local, "key", json!([1, 2])).await.unwrap();
        // "key" + "[1,2]"
        assert_eq!(store.bytes_in_use(Partition::Local).await.unwrap(), 8);
        assert_eq!(store.bytes_in_use(Partition::Sync).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_over_quota_fails_without_writing() {
        let store = MemoryStore::with_quotas(16, 16);
        store.set(Partition::Sync, "a", json!("small")).await.unwrap();

        let err = store
            .set(Partition::Sync, "b", json!("this value is too large"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { partition: Partition::Sync, .. }));
        assert_eq!(store.get(Partition::Sync, "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwriting_a_key_does_not_double_count() {
        let store = MemoryStore::with_quotas(12, 12);
        store.set(Partition::Local, "k", json!("abcdefgh")).await.unwrap();
        store.set(Partition::Local, "k", json!("hgfedcba")).await.unwrap();
        assert_eq!(store.bytes_in_use(Partition::Local).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn load_defaults_when_key_is_absent() {
        let storage = Storage::new(Arc::new(MemoryStore::new()));
        let items: Vec<String> = storage.load(Partition::Local, "missing").await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn load_reports_corrupt_shapes() {
        let storage = Storage::new(Arc::new(MemoryStore::new()));
        storage
            .save_raw(Partition::Local, "numbers", json!({"not": "a list"}))
            .await
            .unwrap();
        let err = storage
            .load::<Vec<u32>>(Partition::Local, "numbers")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn unserialized_storage_hands_out_no_guard() {
        let storage = Storage::unserialized(Arc::new(MemoryStore::new()));
        assert!(storage.lock(Partition::Local, SITUATIONS_KEY).await.is_none());

        let storage = Storage::new(Arc::new(MemoryStore::new()));
        assert!(storage.lock(Partition::Local, SITUATIONS_KEY).await.is_some());
    }
}
