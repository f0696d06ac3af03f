//! Value Streams
//!
//! [`Store::read_stream`](crate::storage::Store::read_stream) hands back a
//! [`ValueStream`], one of:
//!
//! - **Cached**: a cursor over bytes already in the cache. No disk access.
//! - **Caching**: a [`CachingReader`] over the data file that keeps a copy of
//!   every byte it yields and offers the full value to the cache once the
//!   file is drained.
//! - **Direct**: an [`AutoCloseReader`] used when caching is disabled.
//!
//! Both file-backed readers release the file handle as soon as they reach
//! end of data, so a consumer that drains the stream need not drop it
//! promptly.

use crate::storage::engine::Shared;
use crate::storage::error::StoreError;
use bytes::Bytes;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use tracing::trace;

/// A readable value, from the cache or from disk.
pub enum ValueStream {
    Cached(Cursor<Bytes>),
    Caching(CachingReader),
    Direct(AutoCloseReader),
}

impl ValueStream {
    /// True if the value is being served from the cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, ValueStream::Cached(_))
    }
}

impl Read for ValueStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ValueStream::Cached(cursor) => cursor.read(buf),
            ValueStream::Caching(reader) => reader.read(buf),
            ValueStream::Direct(reader) => reader.read(buf),
        }
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueStream::Cached(cursor) => f
                .debug_struct("Cached")
                .field("len", &cursor.get_ref().len())
                .field("position", &cursor.position())
                .finish(),
            ValueStream::Caching(reader) => fmt::Debug::fmt(reader, f),
            ValueStream::Direct(reader) => fmt::Debug::fmt(reader, f),
        }
    }
}

/// Streams a data file while collecting its bytes for the cache.
///
/// At end of data the collected value is admitted under the engine's
/// exclusive lock. If admission fails the error is returned from that final
/// `read` call, after every byte has already been handed out. Values that
/// outgrow the cache stop being collected and report
/// [`StoreError::CapacityExceeded`] at the end.
pub struct CachingReader {
    shared: Arc<Shared>,
    key: String,
    source: Option<Box<dyn Read + Send>>,
    collected: Vec<u8>,
    size: u64,
    overflowed: bool,
    /// Key version observed when the file was opened
    version: u64,
}

impl CachingReader {
    pub(crate) fn new(
        shared: Arc<Shared>,
        key: &str,
        source: Box<dyn Read + Send>,
        version: u64,
    ) -> Self {
        Self {
            shared,
            key: key.to_string(),
            source: Some(source),
            collected: Vec::new(),
            size: 0,
            overflowed: false,
            version,
        }
    }

    fn collect(&mut self, chunk: &[u8]) {
        self.size += chunk.len() as u64;
        if self.overflowed {
            return;
        }
        if self.size > self.shared.config.max_cache_size {
            self.overflowed = true;
            self.collected = Vec::new();
            return;
        }
        self.collected.extend_from_slice(chunk);
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        if self.overflowed {
            return Err(StoreError::CapacityExceeded {
                key: self.key.clone(),
                size: self.size,
                capacity: self.shared.config.max_cache_size,
            });
        }
        let value = Bytes::from(std::mem::take(&mut self.collected));
        self.shared.populate(self.key.clone(), value, self.version)
    }
}

impl Read for CachingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let n = source.read(buf)?;
        if n > 0 {
            self.collect(&buf[..n]);
            return Ok(n);
        }

        // End of data: release the file before touching the cache lock
        self.source = None;
        trace!(key = %self.key, bytes = self.size, "drained data file");
        self.finish()?;
        Ok(0)
    }
}

impl Drop for CachingReader {
    fn drop(&mut self) {
        self.shared.release_stream(&self.key);
    }
}

impl fmt::Debug for CachingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingReader")
            .field("key", &self.key)
            .field("open", &self.source.is_some())
            .field("bytes", &self.size)
            .field("overflowed", &self.overflowed)
            .finish()
    }
}

/// A plain file stream that closes the file at end of data.
pub struct AutoCloseReader {
    source: Option<Box<dyn Read + Send>>,
}

impl AutoCloseReader {
    pub fn new(source: Box<dyn Read + Send>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// True until end of data has been reached.
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }
}

impl Read for AutoCloseReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        let n = source.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.source = None;
        }
        Ok(n)
    }
}

impl fmt::Debug for AutoCloseReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoCloseReader")
            .field("open", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_close_reader_releases_at_eof() {
        let mut reader = AutoCloseReader::new(Box::new(Cursor::new(b"abc".to_vec())));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert!(!reader.is_open());

        // Further reads keep returning end of data
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_auto_close_reader_empty_buffer_is_not_eof() {
        let mut reader = AutoCloseReader::new(Box::new(Cursor::new(b"abc".to_vec())));
        assert_eq!(reader.read(&mut []).unwrap(), 0);
        assert!(reader.is_open());
    }

    #[test]
    fn test_cached_stream() {
        let mut stream = ValueStream::Cached(Cursor::new(Bytes::from("cached")));
        assert!(stream.is_cached());
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "cached");
    }
}
