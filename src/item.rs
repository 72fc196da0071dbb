//! Cache item protocol.
//!
//! Every item this crate stores in the distributed cache carries one of three tags in its flags. Anything it cannot
//! interpret with confidence is reported as a [`Lookup::Miss`] so that the caller falls back to the backing store.

use std::fmt::Debug;
use std::time::Duration;

use crate::codec;
use crate::property::PropertyList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ItemTag {
    /// No confirmed value; a populate may be in progress.
    Locked   = 1,
    Entity   = 2,
    NotFound = 3,
}

impl ItemTag {
    pub fn from_flags(flags: u32) -> Option<Self> {
        match flags {
            1 => Some(Self::Locked),
            2 => Some(Self::Entity),
            3 => Some(Self::NotFound),
            _ => None,
        }
    }

    pub fn flags(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key:        String,
    pub value:      Vec<u8>,
    pub flags:      u32,
    /// Opaque token handed out by the cache on reads; required for compare-and-swap. Ignored on add and set.
    pub version:    u64,
    pub expiration: Option<Duration>,
}

impl CacheItem {
    /// A lock placeholder. The random value lets the placing caller recognize its own lock later.
    pub fn lock<S: Into<String>>(key: S, ttl: Duration) -> Self {
        Self {
            key:        key.into(),
            value:      rand::random::<[u8; 8]>().to_vec(),
            flags:      ItemTag::Locked.flags(),
            version:    0,
            expiration: Some(ttl),
        }
    }

    /// A lock written by write invalidation. It has no owner, so the next reader may claim it with compare-and-swap.
    pub fn invalidation<S: Into<String>>(key: S, ttl: Duration) -> Self {
        Self {
            key:        key.into(),
            value:      Vec::new(),
            flags:      ItemTag::Locked.flags(),
            version:    0,
            expiration: Some(ttl),
        }
    }

    pub fn entity<S: Into<String>>(key: S, payload: Vec<u8>) -> Self {
        Self {
            key:        key.into(),
            value:      payload,
            flags:      ItemTag::Entity.flags(),
            version:    0,
            expiration: None,
        }
    }

    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self {
            key:        key.into(),
            value:      Vec::new(),
            flags:      ItemTag::NotFound.flags(),
            version:    0,
            expiration: None,
        }
    }

    pub fn tag(&self) -> Option<ItemTag> {
        ItemTag::from_flags(self.flags)
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// True if this is the very lock `lock` placed earlier.
    pub fn is_lock_of(&self, lock: &CacheItem) -> bool {
        self.tag() == Some(ItemTag::Locked)
            && lock.tag() == Some(ItemTag::Locked)
            && !lock.value.is_empty()
            && self.value == lock.value
    }

    /// A lock left by write invalidation rather than by a populate in progress.
    pub fn is_orphan_lock(&self) -> bool {
        self.tag() == Some(ItemTag::Locked) && self.value.is_empty()
    }
}

impl Debug for CacheItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("version", &self.version)
            .field("value_len", &self.value.len())
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// What a cache read tells about a key.
#[derive(Debug, PartialEq)]
pub enum Lookup {
    Entity(PropertyList),
    NotFound,
    Locked,
    /// Absent, unknown tag, or undecodable payload.
    Miss,
}

impl Lookup {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Lookup::Entity(_) | Lookup::NotFound)
    }
}

pub fn interpret(item: Option<&CacheItem>) -> Lookup {
    let Some(item) = item
    else {
        return Lookup::Miss;
    };

    match item.tag() {
        Some(ItemTag::Locked) => Lookup::Locked,
        Some(ItemTag::NotFound) => Lookup::NotFound,
        Some(ItemTag::Entity) => match codec::decode(&item.value) {
            Ok(properties) => Lookup::Entity(properties),
            Err(err) => {
                tracing::warn!("Corrupt cache item '{}': {err}", item.key);
                Lookup::Miss
            }
        },
        None => {
            tracing::debug!("Unknown flags {} on cache item '{}'", item.flags, item.key);
            Lookup::Miss
        }
    }
}
