use crate::cache::misaligned_cache;
use crate::cache::Cache;
use crate::error::CacheError;
use crate::item::CacheItem;
use crate::key::Key;
use crate::traits::BackingStore;
use crate::traits::DistributedCache;
use crate::traits::WriteOutcome;

impl<S, C> Cache<S, C>
where
    S: BackingStore,
    C: DistributedCache,
{
    /// Unconditionally replaces the cache items of freshly written keys with ownerless locks. This is the only place
    /// an unconditional cache write happens. Any populate that read the backing store before the write loses its
    /// compare-and-swap because the item version changes.
    ///
    /// On failure returns the keys whose items may still hold pre-write values.
    pub(crate) async fn invalidate(&self, keys: Vec<Key>) -> Result<(), (Vec<Key>, CacheError)> {
        if keys.is_empty() {
            return Ok(());
        }

        let locks = keys
            .iter()
            .map(|key| CacheItem::invalidation(self.cache_key(key), self.lock_ttl()))
            .collect::<Vec<_>>();

        let outcomes = match self.cache().set_multi(locks).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                tracing::warn!("Failed to invalidate {} key(s): {err}", keys.len());
                return Err((keys, err));
            }
        };

        if outcomes.len() != keys.len() {
            let err = misaligned_cache("set_multi", outcomes.len(), keys.len());
            tracing::warn!("{err}");
            return Err((keys, err));
        }

        let mut stale = Vec::new();
        let mut first_error = None;
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            let err = match outcome {
                WriteOutcome::Stored => continue,
                WriteOutcome::NotStored => CacheError::Backend(format!("lock for '{key}' was not stored")),
                WriteOutcome::Failed(err) => err,
            };
            tracing::warn!("Failed to invalidate '{key}': {err}");
            stale.push(key);
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err((stale, err)),
            None => Ok(()),
        }
    }
}
