//! Plain key-value caches with manual invalidation.
//!
//! Entries never expire on their own. Whoever mutates what a cached value was
//! derived from must clear or evict the entry. There is no locking; a host
//! that shares a cache between threads must serialise access itself.

use std::collections::HashMap;
use std::hash::Hash;

pub trait Cache<K, V> {
    fn get(&self, key: &K) -> Option<&V>;
    fn put(&mut self, key: K, value: V);
    fn remove(&mut self, key: &K) -> Option<V>;
    fn clear(&mut self);
    /// Keeps only the entries for which `keep` returns true.
    fn retain(&mut self, keep: &mut dyn FnMut(&K, &V) -> bool);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct MemoryCache<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for MemoryCache<K, V> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K, V> MemoryCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Eq + Hash, V> Cache<K, V> for MemoryCache<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn retain(&mut self, keep: &mut dyn FnMut(&K, &V) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
