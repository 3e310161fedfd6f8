//! Persistence of cached responses.
//!
//! Every cached response consists of a [`CacheRecord`] and one body file. Records are addressed
//! by [`CacheKey`]; the record names its body, so a body can be replaced by writing the new body
//! first and then atomically swapping the record.
//!
//! Storage sits behind the [`RecordStore`] trait. [`FsRecordStore`] lays records out as
//! properties files:
//!
//! ```text
//! <cache_dir>/<transport_root>/aa/bbccdd/eeff....properties
//! <cache_dir>/<transport_root>/aa/bbccdd/<uuid>.body
//! ```
//!
//! [`MemoryRecordStore`] keeps everything in memory and lets tests age and corrupt entries.
//!
//! # Integrity
//!
//! A record is only usable if the SHA-1 of its current body matches `results-sha1`. Anything
//! else, be it a missing field, a missing body or a checksum mismatch, is a [`CacheError`] which
//! callers log and treat as a cache miss.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;

mod cache_error;
mod cache_key;
mod fs;
mod memory;
mod record;

pub use cache_error::CacheError;
pub use cache_key::{CacheKey, CacheKeyBuilder, make_file_name};
pub use fs::FsRecordStore;
pub use memory::MemoryRecordStore;
pub use record::{BodyHasher, CacheRecord, sha1_base64, sha1_base64_of_file};

/// A body as handed out by a [`RecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBody {
    /// The body lives in a file on disk.
    File(PathBuf),
    /// The body is held in memory.
    Data(Bytes),
}

impl StoredBody {
    /// Computes the checksum of the body in the format used by [`CacheRecord::results_sha1`].
    pub fn checksum(&self) -> io::Result<String> {
        match self {
            StoredBody::File(path) => sha1_base64_of_file(path),
            StoredBody::Data(data) => Ok(sha1_base64(data)),
        }
    }
}

/// Key/value storage for cache records and their bodies.
pub trait RecordStore: fmt::Debug + Send + Sync + 'static {
    /// Loads the record for `key`, or `None` if there is none.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, CacheError>;

    /// Writes the record for `key`, replacing any previous one.
    fn put(&self, key: &CacheKey, record: &CacheRecord) -> io::Result<()>;

    /// Creates a temporary file suitable for [`store_body`](Self::store_body).
    fn tempfile(&self) -> io::Result<NamedTempFile>;

    /// Moves a fully written body into the store and returns its file name.
    fn store_body(&self, key: &CacheKey, body: NamedTempFile) -> io::Result<String>;

    /// Loads a body previously stored under `name`.
    fn load_body(&self, key: &CacheKey, name: &str) -> Result<StoredBody, CacheError>;

    /// Deletes a body that is no longer referenced.
    fn remove_body(&self, key: &CacheKey, name: &str) -> io::Result<()>;

    /// Directory for files materialized from in-memory content.
    fn tmp_dir(&self) -> &Path;

    /// Loads the record for `key` together with its current body, verifying the checksum.
    fn load_verified(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(CacheRecord, StoredBody)>, CacheError> {
        let Some(record) = self.get(key)? else {
            return Ok(None);
        };
        let name = record
            .current_body()
            .ok_or(CacheError::MissingField("file-list"))?;
        let body = self.load_body(key, name)?;

        let actual = body.checksum()?;
        if actual != record.results_sha1 {
            return Err(CacheError::ChecksumMismatch {
                body: name.to_owned(),
                expected: record.results_sha1.clone(),
                actual,
            });
        }

        Ok(Some((record, body)))
    }
}

/// Turns a "not found" io error into `Ok(None)`.
pub(crate) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
