//! Cache Eviction Policies
//!
//! A [`CachePolicy`] decides which entries leave the cache when room is
//! needed. Policies are strategy objects chosen at construction time; the
//! engine never depends on a concrete policy.
//!
//! | Policy            | Eviction order                                  |
//! |-------------------|-------------------------------------------------|
//! | [`UnorderedPolicy`] | map iteration order, no recency tracking      |
//! | [`LruPolicy`]     | least recently accessed first                   |
//! | [`LfuPolicy`]     | fewest hits first, ties broken by recency       |
//!
//! Both policy operations run while the engine holds its exclusive lock.

use crate::storage::cache::{CacheEntry, CacheState};
use crate::storage::error::{Result, StoreError};
use bytes::Bytes;
use std::fmt;

/// Strategy for freeing cache space and inserting values.
pub trait CachePolicy: Send + Sync + fmt::Debug {
    /// Short name for logs and stats.
    fn name(&self) -> &'static str;

    /// Frees at least `required` bytes if possible and returns the number of
    /// bytes actually freed. Running out of entries is not an error; the
    /// caller re-checks feasibility.
    fn eject(&self, cache: &mut CacheState, required: u64) -> u64;

    /// Inserts `value` under `key`, failing if it does not fit.
    fn insert(&self, cache: &mut CacheState, key: String, value: Bytes) -> Result<()> {
        let size = value.len() as u64;
        let existing = cache.get(&key).map_or(0, CacheEntry::size);
        if cache.size() - existing + size > cache.capacity() {
            return Err(StoreError::CapacityExceeded {
                key,
                size,
                capacity: cache.capacity(),
            });
        }
        cache.put(key, value);
        Ok(())
    }
}

/// Outcome of admitting a value into the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Admission {
    /// Entries removed to make room
    pub evicted: usize,
    /// Bytes freed by those removals
    pub freed: u64,
}

/// Places a value in the cache, evicting as the policy sees fit.
///
/// Any existing entry for `key` is dropped first. A value larger than the
/// whole cache is rejected before any eviction happens.
pub fn admit(
    policy: &dyn CachePolicy,
    cache: &mut CacheState,
    key: String,
    value: Bytes,
) -> Result<Admission> {
    cache.remove(&key);

    let size = value.len() as u64;
    if size > cache.capacity() {
        return Err(StoreError::CapacityExceeded {
            key,
            size,
            capacity: cache.capacity(),
        });
    }

    let headroom = (cache.size() + size).saturating_sub(cache.capacity());
    let mut admission = Admission::default();
    if headroom > 0 {
        let before = cache.len();
        admission.freed = policy.eject(cache, headroom);
        admission.evicted = before - cache.len();
    }

    policy.insert(cache, key, value)?;
    Ok(admission)
}

/// Removes `victims` in order until `required` bytes are freed.
fn evict_in_order<'a>(
    cache: &mut CacheState,
    victims: impl IntoIterator<Item = &'a str>,
    required: u64,
) -> u64 {
    let mut freed = 0;
    for key in victims {
        if freed >= required {
            break;
        }
        if let Some(entry) = cache.remove(key) {
            freed += entry.size();
        }
    }
    freed
}

/// Frees space in whatever order the map yields entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnorderedPolicy;

impl CachePolicy for UnorderedPolicy {
    fn name(&self) -> &'static str {
        "unordered"
    }

    fn eject(&self, cache: &mut CacheState, required: u64) -> u64 {
        let keys: Vec<String> = cache.iter().map(|(k, _)| k.clone()).collect();
        evict_in_order(cache, keys.iter().map(String::as_str), required)
    }
}

/// Evicts the least recently accessed entries first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LruPolicy;

impl CachePolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn eject(&self, cache: &mut CacheState, required: u64) -> u64 {
        let mut ranked: Vec<(u64, String)> = cache
            .iter()
            .map(|(k, e)| (e.last_access(), k.clone()))
            .collect();
        ranked.sort_unstable();
        evict_in_order(cache, ranked.iter().map(|(_, k)| k.as_str()), required)
    }
}

/// Evicts the least frequently hit entries first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LfuPolicy;

impl CachePolicy for LfuPolicy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn eject(&self, cache: &mut CacheState, required: u64) -> u64 {
        let mut ranked: Vec<(u64, u64, String)> = cache
            .iter()
            .map(|(k, e)| (e.hits(), e.last_access(), k.clone()))
            .collect();
        ranked.sort_unstable();
        evict_in_order(cache, ranked.iter().map(|(_, _, k)| k.as_str()), required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: u64, entries: &[(&str, usize)]) -> CacheState {
        let mut cache = CacheState::new(capacity);
        for (key, len) in entries {
            cache.put(key.to_string(), Bytes::from(vec![b'x'; *len]));
        }
        cache
    }

    #[test]
    fn test_admit_without_eviction() {
        let mut cache = filled(100, &[("a", 10)]);
        let admission = admit(&UnorderedPolicy, &mut cache, "b".into(), Bytes::from("hello")).unwrap();
        assert_eq!(admission.evicted, 0);
        assert_eq!(cache.size(), 15);
    }

    #[test]
    fn test_admit_rejects_oversized_without_evicting() {
        let mut cache = filled(10, &[("a", 5), ("b", 5)]);
        let err = admit(
            &UnorderedPolicy,
            &mut cache,
            "big".into(),
            Bytes::from(vec![0u8; 11]),
        )
        .unwrap_err();

        assert!(err.is_capacity_exceeded());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 10);
    }

    #[test]
    fn test_admit_replaces_existing_key_first() {
        // Replacing "a" should reuse its space instead of evicting "b"
        let mut cache = filled(10, &[("a", 5), ("b", 5)]);
        let admission = admit(&LruPolicy, &mut cache, "a".into(), Bytes::from(vec![1u8; 5])).unwrap();
        assert_eq!(admission.evicted, 0);
        assert!(cache.contains("b"));
        assert_eq!(cache.size(), 10);
    }

    #[test]
    fn test_unordered_frees_enough() {
        let mut cache = filled(20, &[("a", 5), ("b", 5), ("c", 5), ("d", 5)]);
        admit(&UnorderedPolicy, &mut cache, "e".into(), Bytes::from(vec![0u8; 8])).unwrap();
        assert!(cache.size() <= 20);
        assert!(cache.contains("e"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let mut cache = filled(15, &[("a", 5), ("b", 5), ("c", 5)]);
        cache.lookup("a");
        cache.lookup("c");

        admit(&LruPolicy, &mut cache, "d".into(), Bytes::from(vec![0u8; 5])).unwrap();

        assert!(!cache.contains("b"));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_lfu_evicts_least_frequent() {
        let mut cache = filled(15, &[("a", 5), ("b", 5), ("c", 5)]);
        for _ in 0..3 {
            cache.lookup("a");
            cache.lookup("b");
        }
        cache.lookup("c");

        admit(&LfuPolicy, &mut cache, "d".into(), Bytes::from(vec![0u8; 5])).unwrap();

        assert!(!cache.contains("c"));
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_eject_on_empty_cache_frees_nothing() {
        let mut cache = CacheState::new(10);
        assert_eq!(UnorderedPolicy.eject(&mut cache, 5), 0);
        assert_eq!(LruPolicy.eject(&mut cache, 5), 0);
    }

    #[test]
    fn test_default_insert_enforces_bound() {
        let mut cache = filled(10, &[("a", 8)]);
        let err = UnorderedPolicy
            .insert(&mut cache, "b".into(), Bytes::from("xyz"))
            .unwrap_err();
        assert!(err.is_capacity_exceeded());
        assert_eq!(cache.size(), 8);
    }
}
