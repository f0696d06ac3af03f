//! Store Configuration
//!
//! All fields have defaults, so callers only name what they change:
//!
//! ```
//! use vaultkv::storage::{LruPolicy, StoreConfig};
//! use std::sync::Arc;
//!
//! let config = StoreConfig {
//!     base_dir: "/var/lib/vaultkv".into(),
//!     max_cache_size: 64 * 1024 * 1024,
//!     cache_policy: Arc::new(LruPolicy),
//!     ..Default::default()
//! };
//! assert_eq!(config.buffer_size, 4096);
//! ```

use crate::storage::ext::{Compression, Indexer};
use crate::storage::path::{FlatTransform, PathTransform};
use crate::storage::policy::{CachePolicy, UnorderedPolicy};
use std::path::PathBuf;
use std::sync::Arc;

/// Default base directory, relative to the working directory.
pub const DEFAULT_BASE_DIR: &str = "vaultkv-data";

/// Default cache capacity in bytes.
pub const DEFAULT_CACHE_SIZE: u64 = 512;

/// Default size of internal copy buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

pub const DEFAULT_FILE_MODE: u32 = 0o666;

pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// Name of the backup dump file.
pub const DUMP_FILE_NAME: &str = "backup.dump";

/// Scratch name a backup is written under before being renamed into place.
pub const DUMP_TEMP_NAME: &str = "backup.dump.tmp";

/// How a bypass read gets rid of the stale cache entry it skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BypassEviction {
    /// Evict on a detached thread the reader never waits for. A write or
    /// read of the same key issued right after may run before or after it.
    #[default]
    Deferred,
    /// Evict before the disk read starts.
    Immediate,
}

/// Construction-time configuration. Immutable once the store is open.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for data files
    pub base_dir: PathBuf,
    /// Cache capacity in bytes; 0 disables caching
    pub max_cache_size: u64,
    /// Key to location mapping
    pub path_transform: Arc<dyn PathTransform>,
    /// Eviction strategy
    pub cache_policy: Arc<dyn CachePolicy>,
    /// Size of streaming copy buffers
    pub buffer_size: usize,
    /// Permission bits for new data files (Unix)
    pub file_mode: u32,
    /// Permission bits for new directories (Unix)
    pub dir_mode: u32,
    /// Stale-entry handling on bypass reads
    pub bypass_eviction: BypassEviction,
    /// Optional codec for data files
    pub compression: Option<Arc<dyn Compression>>,
    /// Optional ordered key index
    pub indexer: Option<Arc<dyn Indexer>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            max_cache_size: DEFAULT_CACHE_SIZE,
            path_transform: Arc::new(FlatTransform),
            cache_policy: Arc::new(UnorderedPolicy),
            buffer_size: DEFAULT_BUFFER_SIZE,
            file_mode: DEFAULT_FILE_MODE,
            dir_mode: DEFAULT_DIR_MODE,
            bypass_eviction: BypassEviction::Deferred,
            compression: None,
            indexer: None,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Whether reads populate the cache at all.
    pub fn caching_enabled(&self) -> bool {
        self.max_cache_size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.base_dir, PathBuf::from("vaultkv-data"));
        assert_eq!(config.max_cache_size, 512);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.file_mode, 0o666);
        assert_eq!(config.dir_mode, 0o777);
        assert_eq!(config.cache_policy.name(), "unordered");
        assert_eq!(config.bypass_eviction, BypassEviction::Deferred);
        assert!(config.caching_enabled());
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let config = StoreConfig {
            max_cache_size: 0,
            ..StoreConfig::with_base_dir("/tmp/x")
        };
        assert!(!config.caching_enabled());
    }
}
