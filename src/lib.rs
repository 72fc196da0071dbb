//! # consistent-cache
//!
//! A batched caching layer between a fast, lossy, shared cache (memcache-like) and a slow, strongly consistent entity
//! store.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - Key-addressed entities live in an authoritative backing store with unsatisfactory read latency.
//! - A distributed cache shared by many processes offers add-if-absent, compare-and-swap, and unconditional set.
//! - Many independent callers read and write the same keys concurrently, with no coordinator between them.
//!
//! The cache operates on the following principles:
//!
//! - Reads never return a value that is stale relative to the last completed write.
//! - A miss is populated by at most one lock holder; everybody else falls through to the backing store instead of
//!   waiting, so the worst case is one extra cache round-trip plus one backing store round-trip.
//! - Absent entities are cached too.
//! - The cache is an optimization only. When it is down, corrupt, or ambiguous the backing store answers.
//! - Every stage of a batched operation is a single batched call to each store.
//!
//! # Cache Items
//!
//! Every cached item is tagged as a lock, an entity, or a not-found marker. Reads that find nothing usable place a lock
//! with add-if-absent, read it back to learn its version, fetch from the backing store, and swap the result in only if
//! the lock is still the one they placed. Writes overwrite the items of written keys with ownerless locks after the
//! backing store write succeeds, which makes any in-flight populate lose its compare-and-swap. The next reader claims an
//! ownerless lock with compare-and-swap instead of add-if-absent.
//!
//! ```ignore
//! let cache = Cache::builder()
//!     .store(Arc::new(store))
//!     .cache(Arc::new(MemoryCache::new(100_000)))
//!     .build()?;
//!
//! let keys = cache.put_multi(&keys, &records).await?;
//! for result in cache.get_multi::<Record>(&keys).await? {
//!     match result {
//!         KeyResult::Found(record) => println!("{record:?}"),
//!         KeyResult::NotFound => println!("gone"),
//!         KeyResult::Failed(err) => eprintln!("{err}"),
//!     }
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod error;
mod invalidate;
pub mod item;
pub mod key;
pub mod memory;
mod populate;
pub mod property;
pub mod test;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::Cache;
#[doc(inline)]
pub use error::Error;
#[doc(inline)]
pub use key::Key;
#[doc(inline)]
pub use traits::BackingStore;
#[doc(inline)]
pub use traits::DistributedCache;

pub mod prelude {
    pub use crate::cache::Cache;
    pub use crate::codec::Entity;
    pub use crate::codec::EntityObject;
    pub use crate::error::*;
    pub use crate::key::Key;
    pub use crate::property::*;
    pub use crate::traits::*;
    pub use crate::types::*;
}

/// Implements [`Entity`](crate::codec::Entity) for serde-enabled structs using the
/// [struct marshaling convention](crate::codec::to_properties).
#[macro_export]
macro_rules! impl_serde_entity {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::codec::Entity for $ty {
                fn load(
                    properties: $crate::property::PropertyList,
                ) -> ::std::result::Result<Self, $crate::error::CodecError> {
                    $crate::codec::from_properties(properties)
                }

                fn save(&self) -> ::std::result::Result<$crate::property::PropertyList, $crate::error::CodecError> {
                    $crate::codec::to_properties(self)
                }
            }
        )+
    };
}
