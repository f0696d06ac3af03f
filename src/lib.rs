//! # VaultKV - A Disk-Backed Key-Value Store with a Bounded Read Cache
//!
//! VaultKV stores opaque byte values as plain files under a base directory
//! and keeps recently read values in a size-bounded in-memory cache with a
//! pluggable eviction policy. It is meant to be embedded; a small RESP
//! server ships alongside for use over the network.
//!
//! ## Features
//!
//! - **Durable blobs**: one file per key, raw bytes, no framing
//! - **Bounded cache**: the cached bytes never exceed the configured capacity
//! - **Pluggable eviction**: unordered, LRU and LFU policies, or your own
//! - **Streaming I/O**: values are copied through fixed-size buffers
//! - **Bulk writes**: batches fan out to a worker pool
//! - **Backup / restore**: cached entries round-trip through a dump file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              VaultKV                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │  (optional)  │
//! │  │ (main.rs)   │    │  Handler    │    │  Handler    │              │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘              │
//! │                                               │ spawn_blocking      │
//! │                                               ▼                     │
//! │  ┌──────────────────────────────────────────────────────────────┐   │
//! │  │                           Store                              │   │
//! │  │  PathTransform   RwLock<CacheState>   CachePolicy            │   │
//! │  └──────────────────────────────┬───────────────────────────────┘   │
//! │                                 ▼                                   │
//! │                     <base_dir>/<dirs>/<file>                        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use vaultkv::storage::{LruPolicy, Store, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = Store::open(StoreConfig {
//!     base_dir: "/tmp/vaultkv".into(),
//!     max_cache_size: 16 * 1024 * 1024,
//!     cache_policy: Arc::new(LruPolicy),
//!     ..Default::default()
//! })?;
//!
//! store.write_string("name", "vault")?;
//! assert_eq!(store.read_string("name")?, "vault");
//!
//! store.backup()?;
//! # Ok::<(), vaultkv::storage::StoreError>(())
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the store, cache, eviction policies, bulk writes, backups
//! - [`protocol`]: RESP request parsing and reply encoding
//! - [`commands`]: command dispatch onto the store
//! - [`connection`]: client connection management

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, Request, RespValue};
pub use storage::{Store, StoreConfig, StoreError};

/// The default port the server listens on
pub const DEFAULT_PORT: u16 = 6380;

/// The default host the server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of VaultKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
