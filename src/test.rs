#![cfg(any(test, feature = "test"))]
//! Test support: fault-injecting collaborators and sample entities.


pub use entities::CounterEntity;
pub use entities::SliceEntity;
pub use entities::TaggedEntity;
pub use entities::TestEntity;
pub use hooks::HookedCache;
pub use hooks::HookedStore;

use std::sync::Arc;

use crate::cache::Cache;
use crate::memory::MemoryCache;
use crate::memory::MemoryStore;

pub type TestCache = Cache<HookedStore<MemoryStore>, HookedCache<MemoryCache>>;

/// A controller over in-memory collaborators wrapped into hooks. The hooks are returned too so tests can steer them.
pub fn test_cache() -> (TestCache, Arc<HookedStore<MemoryStore>>, Arc<HookedCache<MemoryCache>>) {
    init_tracing();
    let store = Arc::new(HookedStore::new(MemoryStore::new()));
    let cache = Arc::new(HookedCache::new(MemoryCache::default()));
    let controller = Cache::builder()
        .store(Arc::clone(&store))
        .cache(Arc::clone(&cache))
        .build()
        .unwrap();
    (controller, store, cache)
}

#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init_tracing() {}
