//! Shared in-memory caches for layer bytes

use bytes::Bytes;
use dashmap::DashMap;
use std::hash::Hash;

/// Key of a decompressed chunk: layer digest and compressed offset
pub type ChunkKey = (String, u64);

/// Key of a compressed byte range: offset and length
pub type RangeKey = (u64, u64);

/// How a read interacts with the decompressed chunk cache
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CacheMode {
    /// Foreground reads use and populate both caches
    Shared,
    /// Background reads fill the blob cache but leave the read cache alone
    Direct,
}

/// Concurrent map of immutable byte buffers, without eviction
#[derive(Debug)]
pub struct MemoryCache<K: Eq + Hash> {
    map: DashMap<K, Bytes>,
}

impl<K: Eq + Hash> Default for MemoryCache<K> {
    fn default() -> Self {
        MemoryCache::new()
    }
}

impl<K: Eq + Hash> MemoryCache<K> {
    pub fn new() -> Self {
        MemoryCache {
            map: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Bytes> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: K, value: Bytes) {
        self.map.insert(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
