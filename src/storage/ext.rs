//! Extension Points
//!
//! Capabilities the engine accepts without knowing their internals:
//!
//! - [`Compression`]: transforms file bytes on their way to and from disk.
//!   The cache always holds the uncompressed value.
//! - [`Indexer`]: an ordered view of the keys in the store, kept current on
//!   every write and delete.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Bound;
use std::sync::{Mutex, PoisonError};

/// A stream codec applied to data files.
pub trait Compression: Send + Sync {
    /// Wraps `dst` so bytes written to the result are encoded into it.
    /// Dropping the returned writer after a successful `flush` must leave
    /// `dst` holding a complete encoding.
    fn writer<'a>(&self, dst: Box<dyn Write + Send + 'a>) -> io::Result<Box<dyn Write + Send + 'a>>;

    /// Wraps `src` so reads from the result yield decoded bytes.
    fn reader(&self, src: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>>;
}

impl fmt::Debug for dyn Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Compression")
    }
}

/// An ordered key index.
pub trait Indexer: Send + Sync {
    /// Seeds the index with the keys already on disk.
    fn initialize(&self, keys: Vec<String>);

    fn insert(&self, key: &str);

    fn delete(&self, key: &str);

    /// Up to `n` keys strictly after `from` in index order; an empty `from`
    /// starts at the beginning.
    fn keys(&self, from: &str, n: usize) -> Vec<String>;
}

impl fmt::Debug for dyn Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Indexer")
    }
}

/// Lexicographically ordered in-memory index.
#[derive(Debug, Default)]
pub struct OrderedIndex {
    keys: Mutex<BTreeSet<String>>,
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Indexer for OrderedIndex {
    fn initialize(&self, keys: Vec<String>) {
        let mut index = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        index.clear();
        index.extend(keys);
    }

    fn insert(&self, key: &str) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    fn delete(&self, key: &str) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn keys(&self, from: &str, n: usize) -> Vec<String> {
        let index = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let lower = if from.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(from.to_string())
        };
        index
            .range((lower, Bound::Unbounded))
            .take(n)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_index_pages() {
        let index = OrderedIndex::new();
        index.initialize(vec!["c".into(), "a".into(), "b".into()]);
        index.insert("d");
        index.delete("b");

        assert_eq!(index.keys("", 10), vec!["a", "c", "d"]);
        assert_eq!(index.keys("a", 1), vec!["c"]);
        assert_eq!(index.keys("d", 5), Vec::<String>::new());
        assert_eq!(index.len(), 3);
    }
}
