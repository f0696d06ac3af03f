//! Bounded Value Cache
//!
//! [`CacheState`] is the mapping from key to cached value plus the running
//! aggregate size. The engine owns exactly one of these behind its
//! readers-writer lock; eviction policies receive it mutably while the engine
//! holds the exclusive side.
//!
//! `put` and `remove` are the only mutators and both keep
//! `size == sum of entry sizes`.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A cached value with the bookkeeping eviction policies rank by.
#[derive(Debug)]
pub struct CacheEntry {
    value: Bytes,
    /// Insertion generation, unique per `put`
    generation: u64,
    /// Logical time of the most recent hit (or insertion)
    last_access: AtomicU64,
    /// Number of cache hits since insertion
    hits: AtomicU64,
}

impl CacheEntry {
    /// The cached bytes.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Size of the value in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// The cache mapping and its aggregate size counter.
#[derive(Debug)]
pub struct CacheState {
    entries: HashMap<String, CacheEntry>,
    size: u64,
    capacity: u64,
    /// Logical clock for generations and access times
    clock: AtomicU64,
}

impl CacheState {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: HashMap::new(),
            size: 0,
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    /// Sum of the sizes of all cached values.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Maximum aggregate size.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Looks up a value and records the hit. Only needs shared access.
    pub fn lookup(&self, key: &str) -> Option<(Bytes, u64)> {
        let entry = self.entries.get(key)?;
        let now = self.tick();
        entry.last_access.store(now, Ordering::Relaxed);
        entry.hits.fetch_add(1, Ordering::Relaxed);
        Some((entry.value.clone(), entry.generation))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    /// Inserts or replaces a value without any capacity check.
    ///
    /// Policies call this after making room; the capacity bound is theirs to
    /// enforce.
    pub fn put(&mut self, key: String, value: Bytes) {
        self.remove(&key);
        let now = self.tick();
        self.size += value.len() as u64;
        self.entries.insert(
            key,
            CacheEntry {
                value,
                generation: now,
                last_access: AtomicU64::new(now),
                hits: AtomicU64::new(0),
            },
        );
    }

    /// Removes a value, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.size -= entry.size();
        Some(entry)
    }

    /// Removes the entry only if it is still the given generation.
    pub fn remove_generation(&mut self, key: &str, generation: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.generation == generation => {
                self.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drops every entry and resets the size counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.size = 0;
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_remove_track_size() {
        let mut cache = CacheState::new(100);
        cache.put("a".into(), Bytes::from("hello"));
        cache.put("b".into(), Bytes::from("world!"));
        assert_eq!(cache.size(), 11);
        assert_eq!(cache.len(), 2);

        // Overwrite replaces the old size
        cache.put("a".into(), Bytes::from("hi"));
        assert_eq!(cache.size(), 8);

        assert!(cache.remove("b").is_some());
        assert!(cache.remove("b").is_none());
        assert_eq!(cache.size(), 2);

        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_records_access() {
        let mut cache = CacheState::new(100);
        cache.put("a".into(), Bytes::from("1"));
        cache.put("b".into(), Bytes::from("2"));

        let before = cache.get("a").unwrap().last_access();
        let (value, _) = cache.lookup("a").unwrap();
        assert_eq!(value, Bytes::from("1"));

        let entry = cache.get("a").unwrap();
        assert_eq!(entry.hits(), 1);
        assert!(entry.last_access() > before);
        assert!(entry.last_access() > cache.get("b").unwrap().last_access());
    }

    #[test]
    fn test_remove_generation() {
        let mut cache = CacheState::new(100);
        cache.put("a".into(), Bytes::from("old"));
        let stale = cache.get("a").unwrap().generation();
        cache.put("a".into(), Bytes::from("new"));

        assert!(!cache.remove_generation("a", stale));
        assert!(cache.contains("a"));

        let current = cache.get("a").unwrap().generation();
        assert!(cache.remove_generation("a", current));
        assert_eq!(cache.size(), 0);
    }
}
