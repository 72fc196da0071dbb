use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::CacheError;
use crate::error::StoreError;
use crate::item::CacheItem;
use crate::key::Key;
use crate::property::PropertyList;

pub type ReadResult = Result<Option<PropertyList>, StoreError>;

/// The authoritative, strongly consistent entity store.
///
/// All methods are batched. An outer `Err` means the whole call failed and nothing can be said about individual keys;
/// otherwise the returned vector must be aligned with the input keys.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn read_multi(&self, keys: &[Key]) -> Result<Vec<ReadResult>, StoreError>;

    /// Writes entities and returns their keys, completing the incomplete ones.
    async fn write_multi(
        &self,
        keys: &[Key],
        entities: Vec<PropertyList>,
    ) -> Result<Vec<Result<Key, StoreError>>, StoreError>;

    async fn delete_multi(&self, keys: &[Key]) -> Result<Vec<Result<(), StoreError>>, StoreError>;
}

/// Per-item outcome of a conditional or unconditional cache write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    Stored,
    /// Add found an existing item, or compare-and-swap found a different version (or no item at all).
    NotStored,
    Failed(CacheError),
}

/// A shared, lossy cache with memcache-like primitives. Items may disappear at any moment.
///
/// Write methods return outcomes aligned with the input items.
#[async_trait]
pub trait DistributedCache: Send + Sync + 'static {
    /// Returns the items found; absent keys are simply not in the map.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheItem>, CacheError>;

    async fn add_multi(&self, items: Vec<CacheItem>) -> Result<Vec<WriteOutcome>, CacheError>;

    /// Replaces each item only if its current version equals the item's `version`.
    async fn compare_and_swap_multi(&self, items: Vec<CacheItem>) -> Result<Vec<WriteOutcome>, CacheError>;

    async fn set_multi(&self, items: Vec<CacheItem>) -> Result<Vec<WriteOutcome>, CacheError>;
}
