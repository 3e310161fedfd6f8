use std::collections::HashMap;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::NamedTempFile;

use super::{CacheError, CacheKey, CacheRecord, RecordStore, StoredBody};

#[derive(Debug, Default)]
struct Entries {
    records: HashMap<CacheKey, CacheRecord>,
    bodies: HashMap<(CacheKey, String), Bytes>,
}

/// A [`RecordStore`] that keeps everything in memory.
///
/// Unlike [`FsRecordStore`](super::FsRecordStore), the `last_modified` timestamp of a record is
/// taken from the record itself, so entries can be aged without touching the clock.
#[derive(Debug)]
pub struct MemoryRecordStore {
    entries: Mutex<Entries>,
    tmp_dir: PathBuf,
}

impl MemoryRecordStore {
    /// Creates an empty store which materializes files into `tmp_dir`.
    pub fn new(tmp_dir: PathBuf) -> Self {
        Self {
            entries: Default::default(),
            tmp_dir,
        }
    }

    /// Moves the `last_modified` timestamp of the record for `key` into the past.
    pub fn age(&self, key: &CacheKey, by: Duration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(record) = entries.records.get_mut(key) {
            record.last_modified -= by;
        }
    }

    /// Replaces the current body of `key` without updating its checksum.
    pub fn corrupt_body(&self, key: &CacheKey, data: impl Into<Bytes>) {
        let mut entries = self.entries.lock().unwrap();
        let Some(name) = entries
            .records
            .get(key)
            .and_then(|r| r.current_body())
            .map(String::from)
        else {
            return;
        };
        entries.bodies.insert((key.clone(), name), data.into());
    }

    /// Returns the number of bodies currently held.
    pub fn body_count(&self) -> usize {
        self.entries.lock().unwrap().bodies.len()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, CacheError> {
        Ok(self.entries.lock().unwrap().records.get(key).cloned())
    }

    fn put(&self, key: &CacheKey, record: &CacheRecord) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.records.insert(key.clone(), record.clone());
        Ok(())
    }

    fn tempfile(&self) -> io::Result<NamedTempFile> {
        NamedTempFile::new()
    }

    fn store_body(&self, key: &CacheKey, mut body: NamedTempFile) -> io::Result<String> {
        let mut data = Vec::new();
        body.rewind()?;
        body.read_to_end(&mut data)?;

        let name = format!("{}.body", uuid::Uuid::new_v4().simple());
        let mut entries = self.entries.lock().unwrap();
        entries
            .bodies
            .insert((key.clone(), name.clone()), Bytes::from(data));
        Ok(name)
    }

    fn load_body(&self, key: &CacheKey, name: &str) -> Result<StoredBody, CacheError> {
        let entries = self.entries.lock().unwrap();
        entries
            .bodies
            .get(&(key.clone(), name.to_owned()))
            .cloned()
            .map(StoredBody::Data)
            .ok_or_else(|| CacheError::MissingBody(name.to_owned()))
    }

    fn remove_body(&self, key: &CacheKey, name: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.bodies.remove(&(key.clone(), name.to_owned()));
        Ok(())
    }

    fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }
}
