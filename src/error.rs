use thiserror::Error;

use crate::key::Key;

/// Failures reported by a [`BackingStore`](crate::traits::BackingStore).
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("invalid key '{0}'")]
    InvalidKey(String),
    #[error("invalid entity: {0}")]
    InvalidEntity(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("backing store error: {0}")]
    Backend(String),
}

/// Failures reported by a [`DistributedCache`](crate::traits::DistributedCache).
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache item for '{0}' is too large")]
    TooLarge(String),
    #[error("cache error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("unsupported value shape: {0}")]
    Unsupported(String),
    #[error("field mismatch: {0}")]
    FieldMismatch(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Failure of an individual key within a batch. Sibling keys are unaffected.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum KeyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("got {keys} keys but {values} values")]
    LengthMismatch { keys: usize, values: usize },

    #[error("unsupported result container: {0}")]
    InvalidContainer(String),

    #[error("no such entity: {0}")]
    NotFound(Key),

    #[error("key '{key}': {source}")]
    Key {
        key:    Key,
        #[source]
        source: KeyError,
    },

    /// A backing store failure that cannot be attributed to individual keys.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The backing store writes went through but the cache could not be invalidated; the `stale` keys may be served
    /// stale until their cache items are replaced or expire.
    ///
    /// `written` holds the per-key outcomes of the store operation, aligned with the request. For writes an `Ok` slot
    /// holds the written (possibly completed) key, for deletes the deleted key.
    #[error("cache invalidation failed for {} key(s): {source}", stale.len())]
    Invalidation {
        stale:   Vec<Key>,
        written: Vec<Result<Key, KeyError>>,
        #[source]
        source:  CacheError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
