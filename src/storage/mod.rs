//! Storage Module
//!
//! A disk-backed blob store fronted by a size-bounded read cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Store                             │
//! │                                                              │
//! │  key ──> PathTransform ──> PathKey ──> <base>/<dirs>/<file>  │
//! │                                                              │
//! │  ┌─────────────────────────────┐    ┌─────────────────────┐  │
//! │  │ RwLock<CacheState>          │<───│ CachePolicy         │  │
//! │  │  key -> value, total size   │    │ (eject / insert)    │  │
//! │  └─────────────────────────────┘    └─────────────────────┘  │
//! │                                                              │
//! │  bulk_write ── worker pool      backup / restore ── dump     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `path`: key to on-disk location mapping
//! - `cache`, `policy`: the cache mapping and pluggable eviction
//! - `engine`: the [`Store`] and its read/write data path
//! - `reader`: value streams handed out by reads
//! - `bulk`: concurrent batch writes
//! - `backup`: dump and restore of cached entries
//! - `ext`: compression and key index extension points
//!
//! ## Example
//!
//! ```no_run
//! use vaultkv::storage::{Store, StoreConfig};
//!
//! let store = Store::open(StoreConfig {
//!     max_cache_size: 1024,
//!     ..StoreConfig::with_base_dir("/tmp/vaultkv")
//! })?;
//!
//! store.write("a", b"hello")?;
//! assert_eq!(store.read("a")?, &b"hello"[..]);
//!
//! let results = store.bulk_write(vec![("x", "1"), ("y", "2")], 2);
//! assert!(results.iter().all(|r| r.is_ok()));
//! # Ok::<(), vaultkv::storage::StoreError>(())
//! ```

pub mod backup;
pub mod bulk;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ext;
pub mod path;
pub mod policy;
pub mod reader;

// Re-export commonly used types
pub use backup::RestoreSummary;
pub use bulk::WriteResult;
pub use cache::{CacheEntry, CacheState};
pub use config::{BypassEviction, StoreConfig};
pub use engine::{CacheStats, Store, WriteOptions};
pub use error::{Result, StoreError};
pub use ext::{Compression, Indexer, OrderedIndex};
pub use path::{FlatTransform, PathKey, PathTransform, ShardedTransform};
pub use policy::{CachePolicy, LfuPolicy, LruPolicy, UnorderedPolicy};
pub use reader::{AutoCloseReader, CachingReader, ValueStream};
