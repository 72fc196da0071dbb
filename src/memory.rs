//! In-process collaborators.
//!
//! [`MemoryCache`] is a [`DistributedCache`] built on a [moka](https://crates.io/crates/moka) cache. Like memcache it
//! is bounded and lossy: items get evicted when capacity runs out and expire when their expiration says so.
//! [`MemoryStore`] is a map-backed [`BackingStore`]. Both are good for single-process deployments and tests.

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::ready;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crate::error::CacheError;
use crate::error::StoreError;
use crate::item::CacheItem;
use crate::key::Key;
use crate::property::PropertyList;
use crate::traits::BackingStore;
use crate::traits::DistributedCache;
use crate::traits::ReadResult;
use crate::traits::WriteOutcome;

/// Memcache's item size limit.
pub const MAX_VALUE_SIZE: usize = 1 << 20;

#[derive(Clone, Debug)]
struct StoredItem {
    value:      Arc<Vec<u8>>,
    flags:      u32,
    version:    u64,
    expiration: Option<Duration>,
}

impl StoredItem {
    fn to_item(&self, key: &str) -> CacheItem {
        CacheItem {
            key:        key.to_string(),
            value:      self.value.as_ref().clone(),
            flags:      self.flags,
            version:    self.version,
            expiration: self.expiration,
        }
    }
}

struct ItemExpiry;

impl Expiry<String, StoredItem> for ItemExpiry {
    fn expire_after_create(&self, _key: &String, value: &StoredItem, _created_at: Instant) -> Option<Duration> {
        value.expiration
    }

    // A replacement item brings its own expiration, or none.
    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredItem,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.expiration
    }
}

pub struct MemoryCache {
    items:        MokaCache<String, StoredItem>,
    next_version: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            items:        MokaCache::builder()
                .name("consistent-cache")
                .max_capacity(max_capacity)
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .expire_after(ItemExpiry)
                .build(),
            next_version: AtomicU64::new(1),
        }
    }

    fn stored(&self, item: CacheItem) -> StoredItem {
        StoredItem {
            value:      Arc::new(item.value),
            flags:      item.flags,
            version:    self.next_version.fetch_add(1, Ordering::Relaxed),
            expiration: item.expiration,
        }
    }

    pub async fn get(&self, key: &str) -> Option<CacheItem> {
        self.items.get(key).await.map(|stored| stored.to_item(key))
    }

    /// Drops an item, as the cache may do at any time on its own.
    pub async fn evict(&self, key: &str) {
        self.items.invalidate(key).await;
    }

    pub async fn clear(&self) {
        self.items.invalidate_all();
        self.items.run_pending_tasks().await;
    }

    async fn add(&self, item: CacheItem) -> WriteOutcome {
        let key = item.key.clone();
        let stored = self.stored(item);
        let result = self
            .items
            .entry(key)
            .and_compute_with(|entry| ready(if entry.is_some() { Op::Nop } else { Op::Put(stored) }))
            .await;
        match result {
            CompResult::Inserted(_) => WriteOutcome::Stored,
            _ => WriteOutcome::NotStored,
        }
    }

    async fn compare_and_swap(&self, item: CacheItem) -> WriteOutcome {
        let key = item.key.clone();
        let expected = item.version;
        let stored = self.stored(item);
        let result = self
            .items
            .entry(key)
            .and_compute_with(|entry| {
                ready(match entry {
                    Some(entry) if entry.value().version == expected => Op::Put(stored),
                    _ => Op::Nop,
                })
            })
            .await;
        match result {
            CompResult::ReplacedWith(_) => WriteOutcome::Stored,
            _ => WriteOutcome::NotStored,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

fn too_large(item: &CacheItem) -> Option<WriteOutcome> {
    (item.value.len() > MAX_VALUE_SIZE).then(|| WriteOutcome::Failed(CacheError::TooLarge(item.key.clone())))
}

#[async_trait]
impl DistributedCache for MemoryCache {
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheItem>, CacheError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(stored) = self.items.get(key).await {
                found.insert(key.clone(), stored.to_item(key));
            }
        }
        Ok(found)
    }

    async fn add_multi(&self, items: Vec<CacheItem>) -> Result<Vec<WriteOutcome>, CacheError> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            outcomes.push(match too_large(&item) {
                Some(outcome) => outcome,
                None => self.add(item).await,
            });
        }
        Ok(outcomes)
    }

    async fn compare_and_swap_multi(&self, items: Vec<CacheItem>) -> Result<Vec<WriteOutcome>, CacheError> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            outcomes.push(match too_large(&item) {
                Some(outcome) => outcome,
                None => self.compare_and_swap(item).await,
            });
        }
        Ok(outcomes)
    }

    async fn set_multi(&self, items: Vec<CacheItem>) -> Result<Vec<WriteOutcome>, CacheError> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            if let Some(outcome) = too_large(&item) {
                outcomes.push(outcome);
                continue;
            }
            let key = item.key.clone();
            self.items.insert(key, self.stored(item)).await;
            outcomes.push(WriteOutcome::Stored);
        }
        Ok(outcomes)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<Key, PropertyList>>,
    last_id:  AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    pub fn entity(&self, key: &Key) -> Option<PropertyList> {
        self.entities.read().get(key).cloned()
    }
}

fn addressable(key: &Key) -> Result<(), StoreError> {
    key.validate().map_err(|_| StoreError::InvalidKey(key.to_string()))?;
    if !key.is_complete() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn read_multi(&self, keys: &[Key]) -> Result<Vec<ReadResult>, StoreError> {
        let entities = self.entities.read();
        Ok(keys
            .iter()
            .map(|key| addressable(key).map(|()| entities.get(key).cloned()))
            .collect())
    }

    async fn write_multi(
        &self,
        keys: &[Key],
        entities: Vec<PropertyList>,
    ) -> Result<Vec<Result<Key, StoreError>>, StoreError> {
        if keys.len() != entities.len() {
            return Err(StoreError::Backend(format!(
                "{} keys but {} entities",
                keys.len(),
                entities.len()
            )));
        }

        let mut stored = self.entities.write();
        Ok(keys
            .iter()
            .zip(entities)
            .map(|(key, entity)| {
                key.validate().map_err(|_| StoreError::InvalidKey(key.to_string()))?;
                let key = if key.is_complete() {
                    key.clone()
                }
                else {
                    key.complete_with(self.last_id.fetch_add(1, Ordering::Relaxed) + 1)
                };
                stored.insert(key.clone(), entity);
                Ok(key)
            })
            .collect())
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<Vec<Result<(), StoreError>>, StoreError> {
        let mut stored = self.entities.write();
        Ok(keys
            .iter()
            .map(|key| {
                addressable(key)?;
                stored.remove(key);
                Ok(())
            })
            .collect())
    }
}
