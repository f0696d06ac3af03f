//! Key Placement
//!
//! A [`PathTransform`] maps a key to the directory segments and file name
//! that hold its value under the store's base directory.
//!
//! ```text
//! FlatTransform              "abcdef" -> <base>/abcdef
//! ShardedTransform(2, 2)     "abcdef" -> <base>/ab/cd/abcdef
//! ```
//!
//! Transforms must be pure: the same key always yields the same [`PathKey`],
//! so a write and a later read always meet at the same file. The engine
//! validates every transformed segment with [`PathKey::validate`] before
//! touching the filesystem.

use crate::storage::error::{Result, StoreError};
use std::fmt;
use std::path::{Path, PathBuf};

/// The on-disk location of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    /// Directory segments below the base directory, outermost first
    pub dirs: Vec<String>,
    /// Leaf file name
    pub file_name: String,
    /// The key this location was derived from
    original_key: String,
}

impl PathKey {
    /// Creates a path key. The originating key is attached by the engine.
    pub fn new(dirs: Vec<String>, file_name: impl Into<String>) -> Self {
        Self {
            dirs,
            file_name: file_name.into(),
            original_key: String::new(),
        }
    }

    /// The key this location was computed from.
    pub fn original_key(&self) -> &str {
        &self.original_key
    }

    pub(crate) fn with_original_key(mut self, key: &str) -> Self {
        self.original_key = key.to_string();
        self
    }

    /// Directory holding the data file.
    pub fn dir_in(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        path.extend(&self.dirs);
        path
    }

    /// Full path of the data file.
    pub fn file_in(&self, base: &Path) -> PathBuf {
        self.dir_in(base).join(&self.file_name)
    }

    /// Rejects any segment that could escape the base directory or alias
    /// another key's location.
    pub fn validate(&self) -> Result<()> {
        let key = &self.original_key;
        for segment in self.dirs.iter().chain(std::iter::once(&self.file_name)) {
            if segment.is_empty() {
                return Err(StoreError::invalid_key(key, "empty path segment"));
            }
            if segment == "." || segment == ".." {
                return Err(StoreError::invalid_key(key, "relative path segment"));
            }
            if segment.contains(['/', '\\', '\0']) {
                return Err(StoreError::invalid_key(key, "path separator in key"));
            }
        }
        Ok(())
    }
}

/// Maps keys to on-disk locations.
///
/// Any `Fn(&str) -> PathKey` closure is a transform; its inverse is the leaf
/// file name.
pub trait PathTransform: Send + Sync {
    /// Computes the location for `key`.
    fn transform(&self, key: &str) -> PathKey;

    /// Recovers the key stored at `path_key`.
    fn inverse(&self, path_key: &PathKey) -> String {
        path_key.file_name.clone()
    }
}

impl<F> PathTransform for F
where
    F: Fn(&str) -> PathKey + Send + Sync,
{
    fn transform(&self, key: &str) -> PathKey {
        self(key)
    }
}

impl fmt::Debug for dyn PathTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PathTransform")
    }
}

/// No sharding: every key is a file directly under the base directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatTransform;

impl PathTransform for FlatTransform {
    fn transform(&self, key: &str) -> PathKey {
        PathKey::new(Vec::new(), key)
    }
}

/// Groups leading key characters into nested directories to bound the
/// number of entries per directory.
///
/// Keys shorter than `width * depth` characters get fewer directory levels.
#[derive(Debug, Clone, Copy)]
pub struct ShardedTransform {
    /// Characters per directory segment
    pub width: usize,
    /// Maximum number of directory levels
    pub depth: usize,
}

impl ShardedTransform {
    pub fn new(width: usize, depth: usize) -> Self {
        Self {
            width: width.max(1),
            depth,
        }
    }
}

impl Default for ShardedTransform {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

impl PathTransform for ShardedTransform {
    fn transform(&self, key: &str) -> PathKey {
        let chars: Vec<char> = key.chars().collect();
        let dirs = chars
            .chunks(self.width)
            .take(self.depth)
            .filter(|chunk| chunk.len() == self.width)
            .map(|chunk| chunk.iter().collect())
            .collect();
        PathKey::new(dirs, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_transform() {
        let pk = FlatTransform.transform("hello");
        assert!(pk.dirs.is_empty());
        assert_eq!(pk.file_name, "hello");
        assert_eq!(
            pk.file_in(Path::new("/data")),
            PathBuf::from("/data/hello")
        );
    }

    #[test]
    fn test_sharded_transform() {
        let t = ShardedTransform::new(2, 2);
        let pk = t.transform("abcdef");
        assert_eq!(pk.dirs, vec!["ab".to_string(), "cd".to_string()]);
        assert_eq!(pk.file_name, "abcdef");
        assert_eq!(
            pk.file_in(Path::new("/data")),
            PathBuf::from("/data/ab/cd/abcdef")
        );
        assert_eq!(t.inverse(&pk), "abcdef");

        // Short keys get fewer levels
        let pk = t.transform("abc");
        assert_eq!(pk.dirs, vec!["ab".to_string()]);
        let pk = t.transform("a");
        assert!(pk.dirs.is_empty());
    }

    #[test]
    fn test_sharded_transform_is_deterministic() {
        let t = ShardedTransform::new(3, 4);
        assert_eq!(t.transform("deterministic"), t.transform("deterministic"));
    }

    #[test]
    fn test_validate_rejects_traversal() {
        for key in ["..", ".", "../etc/passwd", "a/b", "a\\b", "nul\0"] {
            let pk = FlatTransform.transform(key).with_original_key(key);
            let err = pk.validate().unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey { .. }), "{key}");
        }

        let pk = ShardedTransform::new(1, 2).transform("../x").with_original_key("../x");
        assert!(pk.validate().is_err());
    }

    #[test]
    fn test_closure_transform() {
        let upper = |key: &str| PathKey::new(vec!["data".into()], key.to_uppercase());
        let pk = upper.transform("abc");
        assert_eq!(pk.dirs, vec!["data".to_string()]);
        assert_eq!(upper.inverse(&pk), "ABC");
    }
}
