//! A FIFO cache wrapping any [`DTable`].
//!
//! Insertion order drives eviction: the oldest cached key is dropped first
//! once `capacity` is exceeded, regardless of access frequency. Writes go
//! through to the inner table and update the cache in place; iteration
//! always reads from the inner table directly since the cache only helps
//! point lookups.

use std::collections::{HashMap, VecDeque};

use crate::dtable::{DTable, DTableError, DTableIter, Entry};
use crate::key::{BlobComparator, Key, KeyType};

/// Wraps `inner` with a bounded FIFO lookup cache.
///
/// Under an abortable transaction the cache must be bypassed entirely (a
/// speculative read must never be cached as if committed), so callers
/// performing a transactional read should call [`CacheDTable::lookup_bypass`]
/// instead of `lookup`.
pub struct CacheDTable<T: DTable> {
    inner: T,
    capacity: usize,
    cache: HashMap<Vec<u8>, Option<Entry>>,
    order: VecDeque<Vec<u8>>,
}

impl<T: DTable> CacheDTable<T> {
    pub fn new(inner: T, capacity: usize) -> Self {
        Self { inner, capacity, cache: HashMap::new(), order: VecDeque::new() }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    fn cache_key(key: &Key) -> Vec<u8> {
        key.to_sort_bytes()
    }

    fn remember(&mut self, cache_key: Vec<u8>, value: Option<Entry>) {
        if self.capacity == 0 {
            return;
        }
        if !self.cache.contains_key(&cache_key) {
            if self.order.len() >= self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.cache.remove(&evicted);
                }
            }
            self.order.push_back(cache_key.clone());
        }
        self.cache.insert(cache_key, value);
    }

    fn forget(&mut self, cache_key: &[u8]) {
        self.cache.remove(cache_key);
        self.order.retain(|k| k != cache_key);
    }

    /// Reads straight through to `inner`, ignoring and not populating the
    /// cache. Used for reads under an abortable transaction.
    pub fn lookup_bypass(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        self.inner.lookup(key)
    }
}

impl<T: DTable> DTable for CacheDTable<T> {
    fn key_type(&self) -> KeyType {
        self.inner.key_type()
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        let cache_key = Self::cache_key(key);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit.clone());
        }
        self.inner.lookup(key)
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        self.inner.iter()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    fn insert(&mut self, key: Key, value: Vec<u8>, append: bool) -> Result<(), DTableError> {
        let cache_key = Self::cache_key(&key);
        self.inner.insert(key, value.clone(), append)?;
        self.remember(cache_key, Some(Entry::Valid(value)));
        Ok(())
    }

    fn remove(&mut self, key: Key) -> Result<(), DTableError> {
        let cache_key = Self::cache_key(&key);
        self.inner.remove(key)?;
        self.remember(cache_key, Some(Entry::Tombstone));
        Ok(())
    }

    fn maintain(&mut self) -> Result<(), DTableError> {
        // Underlying storage may reshuffle entirely (digest/combine); the
        // safest response is to drop everything we've cached rather than
        // risk serving stale hits.
        self.cache.clear();
        self.order.clear();
        self.inner.maintain()
    }

    fn set_blob_cmp(&mut self, cmp: BlobComparator) -> Result<(), DTableError> {
        self.inner.set_blob_cmp(cmp)
    }
}
