//! Lock & populate protocol.
//!
//! For keys the first cache read could not resolve:
//!
//! 1. place a lock item with a random value for each key; keys with no item get an add-if-absent, keys whose item is
//!    an ownerless invalidation lock or is unusable get a compare-and-swap against the version seen by the first read;
//! 2. read the keys back once; a lock holding our value is ours and its version is what we'll swap against;
//!    a decodable entity or not-found item placed by someone else is used as is;
//! 3. read every remaining key from the backing store;
//! 4. compare-and-swap the results into the cache, for owned keys only.
//!
//! A key whose item changed after step 2 (a write invalidated it, for one) makes its swap fail, so a possibly stale read
//! never overwrites fresher data. No step ever waits for another caller, and no cache failure is returned to the caller.

use std::collections::HashMap;

use crate::cache::check_aligned;
use crate::cache::Cache;
use crate::error::CacheError;
use crate::error::Error;
use crate::error::KeyError;
use crate::item;
use crate::item::CacheItem;
use crate::item::Lookup;
use crate::key::Key;
use crate::traits::BackingStore;
use crate::traits::DistributedCache;
use crate::traits::WriteOutcome;
use crate::types::KeyResult;
use crate::types::KeyStatus;
use crate::types::Sink;

/// A key left unresolved by the first cache read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pending {
    pub(crate) idx:   usize,
    /// Version of an item to take over with compare-and-swap; `None` locks with add-if-absent.
    pub(crate) claim: Option<u64>,
}

impl Pending {
    pub(crate) fn add(idx: usize) -> Self {
        Self { idx, claim: None }
    }

    pub(crate) fn claim(idx: usize, version: u64) -> Self {
        Self {
            idx,
            claim: Some(version),
        }
    }
}

impl<S, C> Cache<S, C>
where
    S: BackingStore,
    C: DistributedCache,
{
    pub(crate) async fn lock_and_populate(
        &self,
        keys: &[Key],
        cache_keys: &[String],
        pending: Vec<Pending>,
        results: &mut [Option<KeyStatus>],
        sink: &mut dyn Sink,
    ) -> Result<(), Error> {
        let locks = pending
            .iter()
            .map(|p| CacheItem::lock(cache_keys[p.idx].as_str(), self.lock_ttl()))
            .collect::<Vec<_>>();

        let mut adds = Vec::new();
        let mut claims = Vec::new();
        for (lock, p) in locks.iter().zip(&pending) {
            match p.claim {
                Some(version) => claims.push(lock.clone().with_version(version)),
                None => adds.push(lock.clone()),
            }
        }
        if !adds.is_empty() {
            let count = adds.len();
            Self::report_locks("add", count, self.cache().add_multi(adds).await);
        }
        if !claims.is_empty() {
            let count = claims.len();
            Self::report_locks("claim", count, self.cache().compare_and_swap_multi(claims).await);
        }

        // One read serves both purposes: it gives owned locks' versions and picks up values other callers have
        // populated meanwhile.
        let lock_keys = locks.iter().map(|l| l.key.clone()).collect::<Vec<_>>();
        let items = self.read_cache(&lock_keys).await;

        let mut owned: HashMap<usize, u64> = HashMap::new();
        let mut fetch = Vec::with_capacity(pending.len());
        for (lock, idx) in locks.iter().zip(pending.into_iter().map(|p| p.idx)) {
            let item = items.get(&lock.key);
            if let Some(item) = item.filter(|item| item.is_lock_of(lock)) {
                owned.insert(idx, item.version);
                fetch.push(idx);
                continue;
            }

            match item::interpret(item) {
                Lookup::Entity(properties) => match sink.accept(idx, properties) {
                    Ok(()) => {
                        results[idx] = Some(KeyResult::Found(()));
                        continue;
                    }
                    Err(err) => tracing::debug!("Populated entity '{}' does not load: {err}", keys[idx]),
                },
                Lookup::NotFound => {
                    results[idx] = Some(KeyResult::NotFound);
                    continue;
                }
                Lookup::Locked | Lookup::Miss => (),
            }
            fetch.push(idx);
        }

        if fetch.is_empty() {
            return Ok(());
        }

        tracing::trace!(
            "Reading {} key(s) from the backing store, {} owned",
            fetch.len(),
            owned.len()
        );

        let fetch_keys = fetch.iter().map(|&idx| keys[idx].clone()).collect::<Vec<_>>();
        let fetched = self.store().read_multi(&fetch_keys).await?;
        check_aligned("read_multi", fetched.len(), fetch.len())?;

        let mut swaps = Vec::with_capacity(owned.len());
        for (idx, outcome) in fetch.into_iter().zip(fetched) {
            let version = owned.get(&idx).copied();
            results[idx] = Some(match outcome {
                Ok(Some(properties)) => {
                    if let Some(version) = version {
                        if let Some(item) = self.entity_item(&cache_keys[idx], &properties) {
                            swaps.push(item.with_version(version));
                        }
                    }
                    match sink.accept(idx, properties) {
                        Ok(()) => KeyResult::Found(()),
                        Err(err) => KeyResult::Failed(KeyError::Codec(err)),
                    }
                }
                Ok(None) => {
                    if let Some(version) = version {
                        swaps.push(CacheItem::not_found(cache_keys[idx].as_str()).with_version(version));
                    }
                    KeyResult::NotFound
                }
                // The lock stays in place; the next reader retries the backing store.
                Err(err) => KeyResult::Failed(KeyError::Store(err)),
            });
        }

        if !swaps.is_empty() {
            self.swap_in(swaps).await;
        }

        Ok(())
    }

    // Lock placement only prepares ownership; the read back decides it, so failures here are just reported.
    fn report_locks(op: &str, count: usize, outcome: Result<Vec<WriteOutcome>, CacheError>) {
        match outcome {
            Ok(outcomes) => {
                let landed = outcomes.iter().filter(|o| **o == WriteOutcome::Stored).count();
                tracing::trace!("{op}: {landed} of {count} lock(s) landed");
                for outcome in outcomes {
                    if let WriteOutcome::Failed(err) = outcome {
                        tracing::warn!("{op}: failed to lock: {err}");
                    }
                }
            }
            Err(err) => tracing::warn!("{op}: failed to place {count} lock(s): {err}"),
        }
    }

    async fn swap_in(&self, swaps: Vec<CacheItem>) {
        let count = swaps.len();
        let cache_keys = swaps.iter().map(|s| s.key.clone()).collect::<Vec<_>>();
        match self.cache().compare_and_swap_multi(swaps).await {
            Ok(outcomes) => {
                for (cache_key, outcome) in cache_keys.iter().zip(outcomes) {
                    match outcome {
                        WriteOutcome::Stored => (),
                        WriteOutcome::NotStored => {
                            tracing::debug!("Lost populate race for '{cache_key}', value not cached")
                        }
                        WriteOutcome::Failed(err) => tracing::warn!("Failed to cache '{cache_key}': {err}"),
                    }
                }
            }
            Err(err) => tracing::warn!("Failed to cache {count} item(s): {err}"),
        }
    }
}
