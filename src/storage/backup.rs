//! Cache Backup and Restore
//!
//! A backup captures the entries that are *cached* at the time of the call;
//! values that only exist on disk are not included. The dump is a sequence
//! of newline separated JSON records, each a single-entry object mapping a
//! key to its base64 encoded value:
//!
//! ```text
//! {"greeting":"aGVsbG8="}
//! {"empty":""}
//! ```
//!
//! Restoring replays records through the same admission path as a cache
//! miss, so the capacity bound holds and the eviction policy applies.

use crate::storage::config::{DUMP_FILE_NAME, DUMP_TEMP_NAME};
use crate::storage::engine::{self, Store};
use crate::storage::error::{Result, StoreError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A value in a dump record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Blob(Bytes);

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(|raw| Blob(Bytes::from(raw)))
            .map_err(serde::de::Error::custom)
    }
}

/// What a restore did with the records it read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Entries admitted into the cache
    pub restored: usize,
    /// Entries that could not be cached
    pub skipped: usize,
}

impl Store {
    /// Writes the cached entries to `backup.dump` under the base directory.
    ///
    /// Returns the number of records written.
    pub fn backup(&self) -> Result<usize> {
        let dir = self.base_dir().to_path_buf();
        self.backup_to(dir)
    }

    /// Writes the cached entries to `backup.dump` under `dir`.
    ///
    /// The dump is written under a scratch name and renamed into place, so a
    /// failed backup never leaves a truncated dump behind.
    pub fn backup_to(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let config = self.config();

        let snapshot: Vec<(String, Bytes)> = {
            let cache = self.shared().read_cache();
            cache
                .iter()
                .map(|(key, entry)| (key.clone(), entry.value().clone()))
                .collect()
        };

        engine::create_dirs(dir, config.dir_mode)
            .map_err(|e| StoreError::io("create directory", dir, e))?;
        let tmp = dir.join(DUMP_TEMP_NAME);
        let target = dir.join(DUMP_FILE_NAME);

        let file = engine::open_for_write(&tmp, false, config.file_mode)
            .map_err(|e| StoreError::io("open", &tmp, e))?;
        if let Err(err) = write_records(&file, &snapshot, config.buffer_size, &tmp) {
            drop(file);
            return Err(engine::clean_up(&tmp, None, err));
        }
        drop(file);

        if let Err(e) = fs::rename(&tmp, &target) {
            return Err(engine::clean_up(&tmp, None, StoreError::io("rename", &target, e)));
        }

        info!(records = snapshot.len(), path = %target.display(), "Cache backed up");
        Ok(snapshot.len())
    }

    /// Loads `backup.dump` from `from_dir` into the cache.
    ///
    /// Records are admitted one at a time. A record too large for the cache,
    /// or whose key the store would reject, is skipped. A corrupt record
    /// stops the restore with [`StoreError::Decode`]; records before it stay
    /// cached.
    pub fn restore(&self, from_dir: impl AsRef<Path>) -> Result<RestoreSummary> {
        let path: PathBuf = from_dir.as_ref().join(DUMP_FILE_NAME);
        let file = File::open(&path).map_err(|e| StoreError::io("open", &path, e))?;
        let reader = BufReader::with_capacity(self.config().buffer_size, file);

        let records =
            serde_json::Deserializer::from_reader(reader).into_iter::<HashMap<String, Blob>>();
        let mut summary = RestoreSummary::default();

        for (index, record) in records.enumerate() {
            let record = record.map_err(|source| StoreError::Decode {
                path: path.clone(),
                record: index + 1,
                source,
            })?;

            for (key, Blob(value)) in record {
                if self.restore_entry(key, value) {
                    summary.restored += 1;
                } else {
                    summary.skipped += 1;
                }
            }
        }

        info!(
            restored = summary.restored,
            skipped = summary.skipped,
            path = %path.display(),
            "Cache restored"
        );
        Ok(summary)
    }

    fn restore_entry(&self, key: String, value: Bytes) -> bool {
        if !self.config().caching_enabled() {
            debug!(key = %key, "caching disabled, skipping backup record");
            return false;
        }
        if let Err(e) = self.path_key(&key) {
            warn!(error = %e, "Skipping backup record");
            return false;
        }

        let shared = self.shared();
        let mut cache = shared.write_cache();
        match shared.admit(&mut cache, key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Skipping backup record");
                false
            }
        }
    }
}

fn write_records(file: &File, records: &[(String, Bytes)], buffer_size: usize, path: &Path) -> Result<()> {
    let mut writer = BufWriter::with_capacity(buffer_size, file);
    for (key, value) in records {
        let record = HashMap::from([(key.as_str(), Blob(value.clone()))]);
        serde_json::to_writer(&mut writer, &record)
            .map_err(|e| StoreError::io("write", path, io::Error::from(e)))?;
        writer
            .write_all(b"\n")
            .map_err(|e| StoreError::io("write", path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io("flush", path, e))?;
    drop(writer);
    file.sync_all().map_err(|e| StoreError::io("sync", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::StoreConfig;
    use tempfile::TempDir;

    fn create_store(capacity: u64) -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig {
            max_cache_size: capacity,
            ..StoreConfig::with_base_dir(dir.path())
        })
        .unwrap();
        (store, dir)
    }

    #[test]
    fn test_backup_then_restore_reproduces_cache() {
        let (source, source_dir) = create_store(1024);
        source.write("a", b"hello").unwrap();
        source.write("b", b"").unwrap();
        source.write("disk-only", b"never read").unwrap();
        source.read("a").unwrap();
        source.read("b").unwrap();

        assert_eq!(source.backup().unwrap(), 2);
        assert!(source_dir.path().join(DUMP_FILE_NAME).is_file());
        assert!(!source_dir.path().join(DUMP_TEMP_NAME).exists());

        let (target, _target_dir) = create_store(1024);
        let summary = target.restore(source_dir.path()).unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                restored: 2,
                skipped: 0
            }
        );

        assert!(target.is_cached("a"));
        assert!(target.is_cached("b"));
        assert!(!target.is_cached("disk-only"));
        assert_eq!(target.read("a").unwrap(), Bytes::from("hello"));
        assert_eq!(target.stats().size, 5);
    }

    #[test]
    fn test_dump_record_format() {
        let (store, dir) = create_store(1024);
        store.write("greeting", b"hello").unwrap();
        store.read("greeting").unwrap();
        store.backup().unwrap();

        let dump = fs::read_to_string(dir.path().join(DUMP_FILE_NAME)).unwrap();
        assert_eq!(dump, "{\"greeting\":\"aGVsbG8=\"}\n");
    }

    #[test]
    fn test_backup_to_explicit_dir() {
        let (store, _dir) = create_store(1024);
        let elsewhere = TempDir::new().unwrap();
        let nested = elsewhere.path().join("snapshots");

        store.write("k", b"v").unwrap();
        store.read("k").unwrap();
        assert_eq!(store.backup_to(&nested).unwrap(), 1);

        store.close();
        let summary = store.restore(&nested).unwrap();
        assert_eq!(summary.restored, 1);
        assert!(store.is_cached("k"));
    }

    #[test]
    fn test_restore_respects_capacity() {
        let (source, source_dir) = create_store(1024);
        for i in 0..4 {
            let key = format!("k{i}");
            source.write(&key, vec![b'x'; 40]).unwrap();
            source.read(&key).unwrap();
        }
        source.write("huge", vec![b'y'; 200]).unwrap();
        source.read("huge").unwrap();
        source.backup().unwrap();

        let (target, _target_dir) = create_store(100);
        let summary = target.restore(source_dir.path()).unwrap();

        assert_eq!(summary.restored + summary.skipped, 5);
        assert!(summary.skipped >= 1);
        assert!(!target.is_cached("huge"));
        assert!(target.stats().size <= 100);
    }

    #[test]
    fn test_restore_stops_at_corrupt_record() {
        let (store, dir) = create_store(1024);
        fs::write(
            dir.path().join(DUMP_FILE_NAME),
            "{\"good\":\"aGk=\"}\n{\"bad\": not json}\n{\"later\":\"aGk=\"}\n",
        )
        .unwrap();

        let err = store.restore(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Decode { record: 2, .. }));
        assert!(store.is_cached("good"));
        assert!(!store.is_cached("later"));
    }

    #[test]
    fn test_restore_rejects_invalid_base64() {
        let (store, dir) = create_store(1024);
        fs::write(dir.path().join(DUMP_FILE_NAME), "{\"k\":\"%%%\"}\n").unwrap();

        let err = store.restore(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Decode { record: 1, .. }));
    }

    #[test]
    fn test_restore_missing_dump() {
        let (store, dir) = create_store(1024);
        let err = store.restore(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Io { op: "open", .. }));
    }

    #[test]
    fn test_restore_skips_invalid_keys() {
        let (store, dir) = create_store(1024);
        fs::write(
            dir.path().join(DUMP_FILE_NAME),
            "{\"../x\":\"aGk=\"}\n{\"ok\":\"aGk=\"}\n",
        )
        .unwrap();

        let summary = store.restore(dir.path()).unwrap();
        assert_eq!(summary.restored, 1);
        assert_eq!(summary.skipped, 1);
    }
}
