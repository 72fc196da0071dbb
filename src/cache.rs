use fieldx::fxstruct;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::codec;
use crate::codec::Entity;
use crate::error::CacheError;
use crate::error::Error;
use crate::error::KeyError;
use crate::error::StoreError;
use crate::item;
use crate::item::CacheItem;
use crate::item::Lookup;
use crate::key::Key;
use crate::populate::Pending;
use crate::property::PropertyList;
use crate::traits::BackingStore;
use crate::traits::DistributedCache;
use crate::types::Collector;
use crate::types::KeyResult;
use crate::types::KeyStatus;
use crate::types::Offset;
use crate::types::ResultSlots;
use crate::types::Sink;

/// The controller sitting between callers, the distributed cache, and the backing store.
///
/// ```ignore
/// let cache = Cache::builder()
///     .store(Arc::new(MemoryStore::new()))
///     .cache(Arc::new(MemoryCache::new(100_000)))
///     .lock_ttl(Duration::from_secs(30))
///     .build()?;
///
/// let key = cache.put(&Key::incomplete("Entity"), &record).await?;
/// let record: Record = cache.get(&key).await?;
/// ```
///
/// Reads are served from the cache whenever it holds a confirmed value and fall back to the backing store otherwise.
/// Writes go to the backing store first and then replace the cache items of the written keys with ownerless locks so
/// no reader can observe the pre-write value afterwards.
#[fxstruct(sync, no_new, get, default(off), builder(doc("Builder object of [`Cache`].")))]
pub struct Cache<S, C>
where
    S: BackingStore,
    C: DistributedCache,
{
    #[fieldx(builder(required))]
    store: Arc<S>,

    #[fieldx(builder(required))]
    cache: Arc<C>,

    /// Prepended to encoded keys to build cache indices. Changing it effectively flushes the cache.
    #[fieldx(builder(into), default("ccache:v1:".to_string()))]
    key_prefix: String,

    /// Expiration hint passed along with lock items. A lock nobody replaces only disables caching of its key until
    /// the cache drops it.
    #[fieldx(get(copy), default(Duration::from_secs(32)))]
    lock_ttl: Duration,

    /// Requests with more keys are processed in consecutive chunks of this size.
    #[fieldx(get(copy), default(1000))]
    max_batch_size: usize,

    /// Encoded entities larger than this are served but never cached.
    #[fieldx(get(copy), default(1_000_000))]
    max_item_size: usize,
}

impl<S, C> Cache<S, C>
where
    S: BackingStore,
    C: DistributedCache,
{
    fn batch_size(&self) -> usize {
        self.max_batch_size().max(1)
    }

    pub(crate) fn cache_key(&self, key: &Key) -> String {
        key.cache_key(self.key_prefix())
    }

    fn check_keys(keys: &[Key], require_complete: bool) -> Result<(), Error> {
        for key in keys {
            let reason = match key.validate() {
                Err(reason) => reason,
                Ok(()) if require_complete && !key.is_complete() => "key is incomplete".to_string(),
                Ok(()) => continue,
            };
            return Err(Error::InvalidKey {
                key: key.to_string(),
                reason,
            });
        }
        Ok(())
    }

    // Cache read failures are never fatal; an unreachable cache looks like an empty one.
    pub(crate) async fn read_cache(&self, cache_keys: &[String]) -> HashMap<String, CacheItem> {
        match self.cache().get_multi(cache_keys).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(
                    "Cache read of {} key(s) failed, serving from the backing store: {err}",
                    cache_keys.len()
                );
                HashMap::new()
            }
        }
    }

    /// Builds the item to cache for a freshly read entity, or `None` if it must not be cached.
    pub(crate) fn entity_item(&self, cache_key: &str, properties: &PropertyList) -> Option<CacheItem> {
        match codec::encode(properties) {
            Ok(payload) if payload.len() > self.max_item_size() => {
                tracing::debug!("Entity '{cache_key}' is too large to cache: {} bytes", payload.len());
                None
            }
            Ok(payload) => Some(CacheItem::entity(cache_key, payload)),
            Err(err) => {
                tracing::warn!("Entity '{cache_key}' cannot be encoded for caching: {err}");
                None
            }
        }
    }

    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn get<T: Entity>(&self, key: &Key) -> Result<T, Error> {
        let mut results = self.get_multi::<T>(std::slice::from_ref(key)).await?;
        results
            .pop()
            .ok_or_else(|| Error::Internal(format!("no result for '{key}'")))?
            .into_result(key)
    }

    /// Loads entities of a single type. The result is aligned with `keys`.
    #[instrument(level = "debug", skip_all, fields(keys = keys.len()))]
    pub async fn get_multi<T: Entity>(&self, keys: &[Key]) -> Result<Vec<KeyResult<T>>, Error> {
        let mut collector = Collector::<T>((0..keys.len()).map(|_| None).collect());
        let statuses = self.load(keys, &mut collector).await?;

        statuses
            .into_iter()
            .zip(collector.0)
            .zip(keys)
            .map(|((status, value), key)| match status {
                KeyResult::Found(()) => value
                    .map(KeyResult::Found)
                    .ok_or_else(|| Error::Internal(format!("'{key}' reported found but not loaded"))),
                KeyResult::NotFound => Ok(KeyResult::NotFound),
                KeyResult::Failed(err) => Ok(KeyResult::Failed(err)),
            })
            .collect()
    }

    /// Loads entities into a caller-provided container. Container shape problems are reported before any I/O.
    #[instrument(level = "debug", skip_all, fields(keys = keys.len()))]
    pub async fn get_multi_into<T: Entity>(
        &self,
        keys: &[Key],
        mut slots: ResultSlots<'_, T>,
    ) -> Result<Vec<KeyStatus>, Error> {
        slots.validate(keys.len())?;
        self.load(keys, &mut slots).await
    }

    async fn load(&self, keys: &[Key], sink: &mut dyn Sink) -> Result<Vec<KeyStatus>, Error> {
        Self::check_keys(keys, true)?;

        let batch_size = self.batch_size();
        let mut statuses = Vec::with_capacity(keys.len());
        for (n, chunk) in keys.chunks(batch_size).enumerate() {
            let mut offset = Offset {
                sink: &mut *sink,
                base: n * batch_size,
            };
            statuses.extend(self.load_chunk(chunk, &mut offset).await?);
        }
        Ok(statuses)
    }

    async fn load_chunk(&self, keys: &[Key], sink: &mut dyn Sink) -> Result<Vec<KeyStatus>, Error> {
        let cache_keys = keys.iter().map(|k| self.cache_key(k)).collect::<Vec<_>>();
        let mut results: Vec<Option<KeyStatus>> = vec![None; keys.len()];

        let items = self.read_cache(&cache_keys).await;
        let mut pending = Vec::new();
        for (idx, cache_key) in cache_keys.iter().enumerate() {
            let item = items.get(cache_key);
            match item::interpret(item) {
                Lookup::Entity(properties) => match sink.accept(idx, properties) {
                    Ok(()) => results[idx] = Some(KeyResult::Found(())),
                    Err(err) => {
                        tracing::debug!("Cached entity '{}' does not load, refetching: {err}", keys[idx]);
                        pending.push(Pending::add(idx));
                    }
                },
                Lookup::NotFound => results[idx] = Some(KeyResult::NotFound),
                // Ownerless locks and unusable items are claimed in place; populate locks are left to their owner.
                Lookup::Locked => pending.push(match item.filter(|i| i.is_orphan_lock()) {
                    Some(item) => Pending::claim(idx, item.version),
                    None => Pending::add(idx),
                }),
                Lookup::Miss => pending.push(match item {
                    Some(item) => Pending::claim(idx, item.version),
                    None => Pending::add(idx),
                }),
            }
        }

        tracing::trace!("{} of {} key(s) served from cache", keys.len() - pending.len(), keys.len());

        if !pending.is_empty() {
            self.lock_and_populate(keys, &cache_keys, pending, &mut results, sink)
                .await?;
        }

        results
            .into_iter()
            .zip(keys)
            .map(|(result, key)| result.ok_or_else(|| Error::Internal(format!("no outcome for '{key}'"))))
            .collect()
    }

    #[instrument(level = "debug", skip(self, entity), fields(key = %key))]
    pub async fn put<T: Entity>(&self, key: &Key, entity: &T) -> Result<Key, Error> {
        let mut results = self
            .put_multi(std::slice::from_ref(key), std::slice::from_ref(entity))
            .await?;
        match results.pop() {
            Some(Ok(key)) => Ok(key),
            Some(Err(source)) => Err(Error::Key {
                key: key.clone(),
                source,
            }),
            None => Err(Error::Internal(format!("no result for '{key}'"))),
        }
    }

    /// Writes entities to the backing store and invalidates their cache items. Returns the written keys, with
    /// incomplete ones completed by the store.
    #[instrument(level = "debug", skip_all, fields(keys = keys.len()))]
    pub async fn put_multi<T: Entity>(
        &self,
        keys: &[Key],
        entities: &[T],
    ) -> Result<Vec<Result<Key, KeyError>>, Error> {
        if keys.len() != entities.len() {
            return Err(Error::LengthMismatch {
                keys:   keys.len(),
                values: entities.len(),
            });
        }
        Self::check_keys(keys, false)?;

        let batch_size = self.batch_size();
        let mut results = Vec::with_capacity(keys.len());
        let mut stale = Vec::new();
        let mut failure = None;

        for (key_chunk, entity_chunk) in keys.chunks(batch_size).zip(entities.chunks(batch_size)) {
            let written = self.write_chunk(key_chunk, entity_chunk).await?;
            let invalidate = written.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
            if let Err((keys, source)) = self.invalidate(invalidate).await {
                stale.extend(keys);
                failure.get_or_insert(source);
            }
            results.extend(written);
        }

        match failure {
            Some(source) => Err(Error::Invalidation {
                stale,
                written: results,
                source,
            }),
            None => Ok(results),
        }
    }

    async fn write_chunk<T: Entity>(&self, keys: &[Key], entities: &[T]) -> Result<Vec<Result<Key, KeyError>>, Error> {
        let mut results: Vec<Option<Result<Key, KeyError>>> = vec![None; keys.len()];
        let mut positions = Vec::with_capacity(keys.len());
        let mut write_keys = Vec::with_capacity(keys.len());
        let mut properties = Vec::with_capacity(keys.len());

        for (idx, (key, entity)) in keys.iter().zip(entities).enumerate() {
            match entity.save() {
                Ok(props) => {
                    positions.push(idx);
                    write_keys.push(key.clone());
                    properties.push(props);
                }
                Err(err) => results[idx] = Some(Err(err.into())),
            }
        }

        if !write_keys.is_empty() {
            let written = self.store().write_multi(&write_keys, properties).await?;
            check_aligned("write_multi", written.len(), positions.len())?;
            for (idx, outcome) in positions.into_iter().zip(written) {
                results[idx] = Some(outcome.map_err(KeyError::from));
            }
        }

        results
            .into_iter()
            .zip(keys)
            .map(|(result, key)| result.ok_or_else(|| Error::Internal(format!("no write outcome for '{key}'"))))
            .collect()
    }

    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &Key) -> Result<(), Error> {
        let mut results = self.delete_multi(std::slice::from_ref(key)).await?;
        match results.pop() {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(Error::Key {
                key: key.clone(),
                source,
            }),
            None => Err(Error::Internal(format!("no result for '{key}'"))),
        }
    }

    #[instrument(level = "debug", skip_all, fields(keys = keys.len()))]
    pub async fn delete_multi(&self, keys: &[Key]) -> Result<Vec<Result<(), KeyError>>, Error> {
        Self::check_keys(keys, true)?;

        let mut results = Vec::with_capacity(keys.len());
        let mut stale = Vec::new();
        let mut failure = None;

        for chunk in keys.chunks(self.batch_size()) {
            let deleted = self.store().delete_multi(chunk).await?;
            check_aligned("delete_multi", deleted.len(), chunk.len())?;

            let invalidate = chunk
                .iter()
                .zip(&deleted)
                .filter(|(_, r)| r.is_ok())
                .map(|(k, _)| k.clone())
                .collect();
            if let Err((keys, source)) = self.invalidate(invalidate).await {
                stale.extend(keys);
                failure.get_or_insert(source);
            }
            results.extend(deleted.into_iter().map(|r| r.map_err(KeyError::from)));
        }

        match failure {
            Some(source) => Err(Error::Invalidation {
                stale,
                written: keys
                    .iter()
                    .zip(&results)
                    .map(|(key, result)| result.clone().map(|()| key.clone()))
                    .collect(),
                source,
            }),
            None => Ok(results),
        }
    }
}

pub(crate) fn check_aligned(op: &str, got: usize, expected: usize) -> Result<(), Error> {
    if got != expected {
        return Err(Error::Store(StoreError::Backend(format!(
            "{op} returned {got} results for {expected} keys"
        ))));
    }
    Ok(())
}

pub(crate) fn misaligned_cache(op: &str, got: usize, expected: usize) -> CacheError {
    CacheError::Backend(format!("{op} returned {got} outcomes for {expected} items"))
}
