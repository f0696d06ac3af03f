//! Disk-Backed Storage Engine with a Bounded Read Cache
//!
//! This module implements the core storage engine for VaultKV. Values live
//! as plain files under a base directory; a size-bounded in-memory cache
//! accelerates repeated reads.
//!
//! ## Design Decisions
//!
//! 1. **One coarse lock**: a single `RwLock` guards the cache mapping and its
//!    size counter. Writes, deletes and cache mutations take it exclusively;
//!    reads take it shared.
//! 2. **Write-invalidate**: a successful write drops the key's cache entry;
//!    the cache is only populated by reads.
//! 3. **Populate on drain**: a cache miss streams the file through a
//!    [`CachingReader`] that admits the value once the whole file was read.
//! 4. **Pluggable eviction**: room is made by the configured [`CachePolicy`].
//!
//! ## Data Path
//!
//! ```text
//!  write_stream(key)                     read_stream(key)
//!        │                                      │
//!        ▼                                      ▼
//!  ┌─────────────┐                      ┌───────────────┐   hit
//!  │ PathKey     │                      │ cache lookup  │──────────> Cached
//!  │ + exclusive │                      │ (shared lock) │
//!  └──────┬──────┘                      └───────┬───────┘
//!         ▼                                     │ miss / bypass
//!  ┌─────────────┐                              ▼
//!  │ mkdir, open │                      ┌───────────────┐
//!  │ copy, sync  │── fail ──> cleanup   │ open data file│
//!  └──────┬──────┘                      └───────┬───────┘
//!         ▼                                     ▼
//!  invalidate cache                     CachingReader ── drain ──> admit
//! ```
//!
//! ## Consistency
//!
//! While a caching reader is open on a key, the store keeps a version for
//! that key which every write and delete of the key advances under the
//! exclusive lock. The reader remembers the version at open and declines to
//! populate the cache if it moved, so a value that was overwritten while
//! being streamed never lands in the cache. Writes to other keys do not
//! affect it.
//!
//! A bypass read with [`BypassEviction::Deferred`] removes the stale entry on
//! a detached thread. There is no ordering between that removal and any
//! later operation on the same key; the removal only applies to the exact
//! entry generation the reader skipped.
//!
//! [`CachePolicy`]: crate::storage::policy::CachePolicy

use crate::storage::cache::CacheState;
use crate::storage::config::{BypassEviction, StoreConfig, DUMP_FILE_NAME, DUMP_TEMP_NAME};
use crate::storage::error::{Result, StoreError};
use crate::storage::path::PathKey;
use crate::storage::policy;
use crate::storage::reader::{AutoCloseReader, CachingReader, ValueStream};
use bytes::Bytes;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use tracing::{debug, info, trace, warn};

/// Flags for [`Store::write_stream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Append to the existing file instead of replacing it
    pub append: bool,
    /// fsync the file before returning.
    ///
    /// Only a synced write surfaces errors the OS reports late, such as a
    /// failed writeback. Without it those errors are lost when the file is
    /// closed and no cleanup runs.
    pub sync: bool,
}

/// Point-in-time cache and operation statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub size: u64,
    pub capacity: u64,
    pub policy: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl CacheStats {
    /// Fraction of reads served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

/// Write version of a key with open caching readers.
#[derive(Debug, Default)]
struct StreamWatch {
    readers: usize,
    version: u64,
}

/// State shared by the store handle, its readers and background tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: StoreConfig,
    cache: RwLock<CacheState>,
    /// Keys with open caching readers. Only locked while holding `cache`,
    /// or alone when a reader is released.
    streams: Mutex<HashMap<String, StreamWatch>>,
    counters: Counters,
}

impl Shared {
    // The cache is consistent after every mutation, so a panic elsewhere
    // while the lock was held leaves nothing to repair.
    pub(crate) fn read_cache(&self) -> RwLockReadGuard<'_, CacheState> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_cache(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<String, StreamWatch>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a caching reader on `key` and returns the key's version.
    /// Call with the cache lock held.
    fn watch_stream(&self, key: &str) -> u64 {
        let mut streams = self.lock_streams();
        let watch = streams.entry(key.to_string()).or_default();
        watch.readers += 1;
        watch.version
    }

    /// Marks `key` as changed for any open reader. Call with the exclusive
    /// cache lock held.
    fn touch_stream(&self, key: &str) {
        if let Some(watch) = self.lock_streams().get_mut(key) {
            watch.version += 1;
        }
    }

    pub(crate) fn release_stream(&self, key: &str) {
        let mut streams = self.lock_streams();
        if let Some(watch) = streams.get_mut(key) {
            watch.readers = watch.readers.saturating_sub(1);
            if watch.readers == 0 {
                streams.remove(key);
            }
        }
    }

    /// Runs the admission algorithm and records evictions.
    pub(crate) fn admit(&self, cache: &mut CacheState, key: String, value: Bytes) -> Result<()> {
        let admission = policy::admit(self.config.cache_policy.as_ref(), cache, key, value)?;
        if admission.evicted > 0 {
            self.counters
                .evictions
                .fetch_add(admission.evicted as u64, Ordering::Relaxed);
            trace!(
                evicted = admission.evicted,
                freed = admission.freed,
                "made room in cache"
            );
        }
        Ok(())
    }

    /// Offers a fully drained value to the cache.
    pub(crate) fn populate(&self, key: String, value: Bytes, opened_at: u64) -> Result<()> {
        let mut cache = self.write_cache();
        let current = self.lock_streams().get(&key).map(|watch| watch.version);
        if current != Some(opened_at) {
            debug!(key = %key, "value changed while streaming, not caching");
            return Ok(());
        }
        let size = value.len();
        self.admit(&mut cache, key.clone(), value)?;
        trace!(key = %key, bytes = size, cache_size = cache.size(), "cached value");
        Ok(())
    }

    fn evict_generation(&self, key: &str, generation: u64) {
        if self.write_cache().remove_generation(key, generation) {
            debug!(key = %key, "evicted entry skipped by bypass read");
        }
    }
}

/// The storage engine.
///
/// `Store` is a cheap handle: clones share the same cache and base directory,
/// and all operations take `&self`, so it can be used from many threads at
/// once.
///
/// # Example
///
/// ```no_run
/// use vaultkv::storage::{Store, StoreConfig};
///
/// let store = Store::open(StoreConfig::with_base_dir("/tmp/vaultkv-demo"))?;
/// store.write("greeting", b"hello")?;
/// assert_eq!(store.read("greeting")?, &b"hello"[..]);
/// # Ok::<(), vaultkv::storage::StoreError>(())
/// ```
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.shared.read_cache();
        f.debug_struct("Store")
            .field("base_dir", &self.shared.config.base_dir)
            .field("policy", &self.shared.config.cache_policy.name())
            .field("cache_entries", &cache.len())
            .field("cache_size", &cache.size())
            .field("capacity", &cache.capacity())
            .finish()
    }
}

impl Store {
    /// Opens a store, creating the base directory if needed and seeding the
    /// indexer (if any) with the keys already on disk.
    pub fn open(config: StoreConfig) -> Result<Self> {
        create_dirs(&config.base_dir, config.dir_mode)
            .map_err(|e| StoreError::io("create directory", &config.base_dir, e))?;

        let store = Self {
            shared: Arc::new(Shared {
                cache: RwLock::new(CacheState::new(config.max_cache_size)),
                streams: Mutex::new(HashMap::new()),
                counters: Counters::default(),
                config,
            }),
        };

        if let Some(indexer) = &store.shared.config.indexer {
            let keys = store.keys()?;
            debug!(keys = keys.len(), "seeding key index");
            indexer.initialize(keys);
        }

        info!(
            base_dir = %store.base_dir().display(),
            cache_bytes = store.shared.config.max_cache_size,
            policy = store.shared.config.cache_policy.name(),
            "Store opened"
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.shared.config.base_dir
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Computes and validates the location of `key`.
    pub fn path_key(&self, key: &str) -> Result<PathKey> {
        if key.is_empty() {
            return Err(StoreError::invalid_key(key, "empty key"));
        }
        let path_key = self
            .shared
            .config
            .path_transform
            .transform(key)
            .with_original_key(key);
        path_key.validate()?;
        if path_key.dirs.is_empty()
            && (path_key.file_name == DUMP_FILE_NAME || path_key.file_name == DUMP_TEMP_NAME)
        {
            return Err(StoreError::invalid_key(key, "name reserved for backups"));
        }
        Ok(path_key)
    }

    /// Full path of the data file for `key`.
    pub fn file_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.path_key(key)?.file_in(self.base_dir()))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Writes `value` under `key`, replacing any previous value.
    pub fn write(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.write_stream(key, value.as_ref(), WriteOptions::default())
    }

    pub fn write_string(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value.as_bytes())
    }

    /// Appends `value` to the existing value of `key`, creating it if absent.
    pub fn append(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.write_stream(
            key,
            value.as_ref(),
            WriteOptions {
                append: true,
                sync: false,
            },
        )
    }

    /// Streams everything `reader` yields into the data file for `key`.
    ///
    /// Holds the exclusive lock for the whole call. If copying, flushing or
    /// syncing fails, the partial write is undone before returning: a
    /// replaced file is removed, an appended file is truncated back to its
    /// previous length. A cleanup failure is reported as
    /// [`StoreError::Cleanup`] wrapping the original error.
    pub fn write_stream<R: Read>(
        &self,
        key: &str,
        mut reader: R,
        options: WriteOptions,
    ) -> Result<()> {
        let path_key = self.path_key(key)?;
        let config = &self.shared.config;

        let mut cache = self.shared.write_cache();
        self.shared.touch_stream(key);

        let dir = path_key.dir_in(&config.base_dir);
        create_dirs(&dir, config.dir_mode)
            .map_err(|e| StoreError::io("create directory", &dir, e))?;

        let path = path_key.file_in(&config.base_dir);
        let file = open_for_write(&path, options.append, config.file_mode)
            .map_err(|e| StoreError::io("open", &path, e))?;

        // Whatever happens next, the cached value no longer matches disk.
        if cache.remove(key).is_some() {
            trace!(key = %key, "invalidated cached value");
        }

        let prior_len = if options.append {
            match file.metadata() {
                Ok(meta) => Some(meta.len()),
                Err(e) => return Err(StoreError::io("stat", &path, e)),
            }
        } else {
            None
        };

        let written = match self.copy_into(&file, &mut reader, &path, options.sync) {
            Ok(n) => n,
            Err(err) => {
                drop(file);
                return Err(clean_up(&path, prior_len, err));
            }
        };
        drop(file);

        self.shared.counters.writes.fetch_add(1, Ordering::Relaxed);
        if let Some(indexer) = &config.indexer {
            indexer.insert(key);
        }

        debug!(
            key = %key,
            bytes = written,
            append = options.append,
            sync = options.sync,
            "Wrote value"
        );
        Ok(())
    }

    fn copy_into(
        &self,
        file: &File,
        reader: &mut dyn Read,
        path: &Path,
        sync: bool,
    ) -> Result<u64> {
        let config = &self.shared.config;

        let sink: Box<dyn Write + Send + '_> = Box::new(file);
        let sink = match &config.compression {
            Some(codec) => codec
                .writer(sink)
                .map_err(|e| StoreError::io("open", path, e))?,
            None => sink,
        };

        let mut writer = BufWriter::with_capacity(config.buffer_size, sink);
        let copied = io::copy(reader, &mut writer).map_err(|e| StoreError::io("copy", path, e))?;
        let mut sink = writer
            .into_inner()
            .map_err(|e| StoreError::io("flush", path, e.into_error()))?;
        sink.flush().map_err(|e| StoreError::io("flush", path, e))?;
        drop(sink);

        if sync {
            file.sync_all().map_err(|e| StoreError::io("sync", path, e))?;
        }
        Ok(copied)
    }

    /// Removes the value stored under `key`.
    ///
    /// Returns `false` if there was no data file.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let path = self.file_path(key)?;

        let mut cache = self.shared.write_cache();
        self.shared.touch_stream(key);
        cache.remove(key);

        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(StoreError::io("remove", &path, e)),
        };

        if removed {
            self.shared.counters.deletes.fetch_add(1, Ordering::Relaxed);
            if let Some(indexer) = &self.shared.config.indexer {
                indexer.delete(key);
            }
            debug!(key = %key, "Deleted value");
        }
        Ok(removed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads the whole value of `key`.
    ///
    /// A value too large for the cache is still returned; it is simply not
    /// cached.
    pub fn read(&self, key: &str) -> Result<Bytes> {
        let mut stream = match self.read_stream(key, false)? {
            ValueStream::Cached(cursor) => return Ok(cursor.into_inner()),
            stream => stream,
        };

        let mut buf = Vec::new();
        if let Err(err) = stream.read_to_end(&mut buf) {
            match StoreError::from_stream_error(&err) {
                Some(inner) if inner.is_capacity_exceeded() => {
                    debug!(key = %key, bytes = buf.len(), "value too large to cache");
                }
                _ => return Err(self.stream_error(key, err)),
            }
        }
        Ok(Bytes::from(buf))
    }

    pub fn read_string(&self, key: &str) -> Result<String> {
        let value = self.read(key)?;
        String::from_utf8(value.to_vec()).map_err(|e| {
            StoreError::io(
                "read",
                self.file_path(key).unwrap_or_default(),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Opens a stream over the value of `key`.
    ///
    /// On a cache hit the stream serves the cached bytes. With
    /// `bypass_cache` the data file is read instead and the cached entry is
    /// evicted according to [`StoreConfig::bypass_eviction`]. On a miss the
    /// stream reads the data file and, when caching is enabled, populates the
    /// cache once drained.
    pub fn read_stream(&self, key: &str, bypass_cache: bool) -> Result<ValueStream> {
        let path_key = self.path_key(key)?;
        let config = &self.shared.config;

        let mut cache = self.shared.read_cache();
        if !bypass_cache {
            if let Some((value, _)) = cache.lookup(key) {
                self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, bytes = value.len(), "cache hit");
                return Ok(ValueStream::Cached(Cursor::new(value)));
            }
        }

        let stale = if bypass_cache {
            cache.get(key).map(|entry| entry.generation())
        } else {
            None
        };
        if let Some(generation) = stale {
            match config.bypass_eviction {
                BypassEviction::Deferred => self.evict_later(key, generation),
                BypassEviction::Immediate => {
                    drop(cache);
                    self.shared.evict_generation(key, generation);
                    cache = self.shared.read_cache();
                }
            }
        }
        self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);

        let path = path_key.file_in(&config.base_dir);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                    path,
                })
            }
            Err(e) => return Err(StoreError::io("open", &path, e)),
        };
        let source: Box<dyn Read + Send> =
            Box::new(BufReader::with_capacity(config.buffer_size, file));
        let source = match &config.compression {
            Some(codec) => codec
                .reader(source)
                .map_err(|e| StoreError::io("open", &path, e))?,
            None => source,
        };

        // Registered under the same lock as the open so no write slips between
        let version = config
            .caching_enabled()
            .then(|| self.shared.watch_stream(key));
        drop(cache);

        match version {
            Some(version) => Ok(ValueStream::Caching(CachingReader::new(
                Arc::clone(&self.shared),
                key,
                source,
                version,
            ))),
            None => Ok(ValueStream::Direct(AutoCloseReader::new(source))),
        }
    }

    fn evict_later(&self, key: &str, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let owned_key = key.to_string();
        let spawned = thread::Builder::new()
            .name("vaultkv-evict".to_string())
            .spawn(move || shared.evict_generation(&owned_key, generation));
        if let Err(e) = spawned {
            warn!(key = %key, error = %e, "Could not schedule eviction of stale entry");
        }
    }

    /// Unwraps a `StoreError` carried by a stream error, or wraps a plain
    /// read failure.
    fn stream_error(&self, key: &str, err: io::Error) -> StoreError {
        let path = self.file_path(key).unwrap_or_default();
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<StoreError>()) {
            Some(Ok(store_err)) => *store_err,
            Some(Err(inner)) => StoreError::io("read", path, io::Error::new(kind, inner)),
            None => StoreError::io("read", path, io::Error::from(kind)),
        }
    }

    /// True if `key` is cached or has a data file.
    pub fn exists(&self, key: &str) -> Result<bool> {
        let path = self.file_path(key)?;
        let cache = self.shared.read_cache();
        if cache.contains(key) {
            return Ok(true);
        }
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io("stat", &path, e)),
        }
    }

    /// True if `key` currently has a cache entry.
    pub fn is_cached(&self, key: &str) -> bool {
        self.shared.read_cache().contains(key)
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Every key with a data file, in directory walk order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let _cache = self.shared.read_cache();
        let mut keys = Vec::new();
        self.collect_keys(self.base_dir(), &mut Vec::new(), &mut keys)?;
        Ok(keys)
    }

    fn collect_keys(
        &self,
        dir: &Path,
        segments: &mut Vec<String>,
        keys: &mut Vec<String>,
    ) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| StoreError::io("read directory", dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io("read directory", dir, e))?;
            // Files with non UTF-8 names were not written by the store
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::io("stat", entry.path(), e))?;

            if file_type.is_dir() {
                segments.push(name);
                self.collect_keys(&entry.path(), segments, keys)?;
                segments.pop();
            } else if file_type.is_file() {
                if segments.is_empty() && (name == DUMP_FILE_NAME || name == DUMP_TEMP_NAME) {
                    continue;
                }
                let path_key = PathKey::new(segments.clone(), name);
                keys.push(self.shared.config.path_transform.inverse(&path_key));
            }
        }
        Ok(())
    }

    /// Up to `n` keys ordered after `from` (exclusive; empty starts at the
    /// beginning). Uses the configured indexer when there is one.
    pub fn scan(&self, from: &str, n: usize) -> Result<Vec<String>> {
        if let Some(indexer) = &self.shared.config.indexer {
            return Ok(indexer.keys(from, n));
        }
        let mut keys = self.keys()?;
        keys.sort_unstable();
        Ok(keys
            .into_iter()
            .filter(|k| from.is_empty() || k.as_str() > from)
            .take(n)
            .collect())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drops every cache entry. Data files are untouched.
    pub fn close(&self) {
        let mut cache = self.shared.write_cache();
        let entries = cache.len();
        cache.clear();
        info!(entries = entries, "Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.shared.read_cache();
        let counters = &self.shared.counters;
        CacheStats {
            entries: cache.len(),
            size: cache.size(),
            capacity: cache.capacity(),
            policy: self.shared.config.cache_policy.name(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
            deletes: counters.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Creates `path` and any missing parents with `mode` permission bits.
pub(crate) fn create_dirs(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

pub(crate) fn open_for_write(path: &Path, append: bool, mode: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Undoes a failed write: truncates back to `prior_len` for appends, removes
/// the file otherwise.
pub(crate) fn clean_up(path: &Path, prior_len: Option<u64>, original: StoreError) -> StoreError {
    let result = match prior_len {
        Some(len) => OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_len(len)),
        None => fs::remove_file(path),
    };
    match result {
        Ok(()) => {
            warn!(path = %path.display(), error = %original, "Rolled back partial write");
            original
        }
        Err(source) => StoreError::Cleanup {
            original: Box::new(original),
            path: path.to_path_buf(),
            source,
        },
    }
}
