use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::Config;

use super::{CacheError, CacheKey, CacheRecord, RecordStore, StoredBody, catch_not_found};

/// A [`RecordStore`] keeping records as properties files on disk.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    /// Directory holding the record tree of one transport root.
    ///
    /// Will be created if it does not exist.
    root: PathBuf,

    /// Directory to use for temporary files.
    ///
    /// When writing a new file into the cache it is best to write it to a temporary file in
    /// a sibling directory, once fully written it can then be atomically moved to the
    /// actual location within the [`root`](Self::root).
    tmp_dir: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: PathBuf, tmp_dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&tmp_dir)?;
        Ok(Self { root, tmp_dir })
    }

    pub fn from_config(config: &Config) -> io::Result<Self> {
        Self::new(
            config.transport_dir(&config.transport_root),
            config.tmp_dir(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the properties file for `key`.
    pub fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.record_path())
    }

    /// Returns the path of a body file belonging to `key`.
    pub fn body_path(&self, key: &CacheKey, name: &str) -> PathBuf {
        let record_path = self.record_path(key);
        match record_path.parent() {
            Some(dir) => dir.join(name),
            None => self.root.join(name),
        }
    }
}

impl RecordStore for FsRecordStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, CacheError> {
        let path = self.record_path(key);
        let Some((text, metadata)) = catch_not_found(|| {
            let metadata = std::fs::metadata(&path)?;
            let text = std::fs::read_to_string(&path)?;
            Ok((text, metadata))
        })?
        else {
            return Ok(None);
        };

        // The mtime is the time the record was last written by the transport.
        let last_modified = metadata.modified()?;
        CacheRecord::from_properties(&text, last_modified).map(Some)
    }

    fn put(&self, key: &CacheKey, record: &CacheRecord) -> io::Result<()> {
        let mut temp_file = self.tempfile()?;
        temp_file.write_all(record.to_properties().as_bytes())?;
        temp_file.flush()?;

        persist_tempfile(temp_file, &self.record_path(key))?;
        Ok(())
    }

    fn tempfile(&self) -> io::Result<NamedTempFile> {
        let path = &self.tmp_dir;
        // Cache cleanup could potentially remove the parent directories we are
        // operating in, so retry the fs operations.
        const MAX_RETRIES: usize = 2;
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = std::fs::create_dir_all(path) {
                sentry::with_scope(
                    |scope| scope.set_extra("path", path.display().to_string().into()),
                    || tracing::error!("Failed to create cache directory: {:?}", e),
                );
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match tempfile::Builder::new().prefix("tmp").tempfile_in(path) {
                Ok(temp_file) => return Ok(temp_file),
                Err(e) => {
                    sentry::with_scope(
                        |scope| scope.set_extra("path", path.display().to_string().into()),
                        || tracing::error!("Failed to create cache file: {:?}", e),
                    );
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                    continue;
                }
            }
        }
    }

    fn store_body(&self, key: &CacheKey, body: NamedTempFile) -> io::Result<String> {
        let name = format!("{}.body", uuid::Uuid::new_v4().simple());
        persist_tempfile(body, &self.body_path(key, &name))?;
        Ok(name)
    }

    fn load_body(&self, key: &CacheKey, name: &str) -> Result<StoredBody, CacheError> {
        let path = self.body_path(key, name);
        if !path.is_file() {
            return Err(CacheError::MissingBody(name.to_owned()));
        }
        Ok(StoredBody::File(path))
    }

    fn remove_body(&self, key: &CacheKey, name: &str) -> io::Result<()> {
        catch_not_found(|| std::fs::remove_file(self.body_path(key, name)))?;
        Ok(())
    }

    fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }
}

fn persist_tempfile(mut temp_file: NamedTempFile, path: &Path) -> io::Result<std::fs::File> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    let file = loop {
        retries += 1;

        if let Err(e) = std::fs::create_dir_all(parent) {
            sentry::with_scope(
                |scope| scope.set_extra("path", parent.display().to_string().into()),
                || tracing::error!("Failed to create cache directory: {:?}", e),
            );
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(path) {
            Ok(file) => break file,
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                sentry::with_scope(
                    |scope| scope.set_extra("path", path.display().to_string().into()),
                    || tracing::error!("Failed to create cache file: {:?}", err),
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
                continue;
            }
        }
    };
    Ok(file)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use filetime::FileTime;

    use super::*;
    use crate::caching::sha1_base64;

    fn store(dir: &Path) -> FsRecordStore {
        FsRecordStore::new(dir.join("rest"), dir.join("tmp")).unwrap()
    }

    fn write_body(store: &FsRecordStore, key: &CacheKey, content: &[u8]) -> String {
        let mut file = store.tempfile().unwrap();
        file.write_all(content).unwrap();
        store.store_body(key, file).unwrap()
    }

    #[test]
    fn test_put_get() {
        restcache_test::setup();
        let dir = restcache_test::tempdir();
        let store = store(dir.path());
        let key = CacheKey::for_testing("put-get");

        assert_eq!(store.get(&key).unwrap(), None);

        let name = write_body(&store, &key, b"hello");
        let record = CacheRecord {
            file_list: vec![name.clone()],
            results_sha1: sha1_base64(b"hello"),
            status: 200,
            mime_type: Some("text/plain".into()),
            cache_control: None,
            location: None,
            last_modified: SystemTime::now(),
        };
        store.put(&key, &record).unwrap();

        let path = store.record_path(&key);
        assert!(path.starts_with(dir.path().join("rest")));
        assert!(path.to_string_lossy().ends_with(".properties"));

        let (loaded, body) = store.load_verified(&key).unwrap().unwrap();
        assert_eq!(loaded.file_list, vec![name.clone()]);
        assert_eq!(body, StoredBody::File(store.body_path(&key, &name)));
    }

    #[test]
    fn test_last_modified_is_mtime() {
        restcache_test::setup();
        let dir = restcache_test::tempdir();
        let store = store(dir.path());
        let key = CacheKey::for_testing("mtime");

        let name = write_body(&store, &key, b"");
        let record = CacheRecord {
            file_list: vec![name],
            results_sha1: sha1_base64(b""),
            status: 200,
            mime_type: None,
            cache_control: None,
            location: None,
            last_modified: SystemTime::now(),
        };
        store.put(&key, &record).unwrap();

        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(store.record_path(&key), FileTime::from_system_time(an_hour_ago)).unwrap();

        let loaded = store.get(&key).unwrap().unwrap();
        let age = SystemTime::now()
            .duration_since(loaded.last_modified)
            .unwrap();
        assert!(age >= Duration::from_secs(3599));
    }

    #[test]
    fn test_corrupted_body() {
        restcache_test::setup();
        let dir = restcache_test::tempdir();
        let store = store(dir.path());
        let key = CacheKey::for_testing("corrupt");

        let name = write_body(&store, &key, b"original");
        let record = CacheRecord {
            file_list: vec![name.clone()],
            results_sha1: sha1_base64(b"original"),
            status: 200,
            mime_type: None,
            cache_control: None,
            location: None,
            last_modified: SystemTime::now(),
        };
        store.put(&key, &record).unwrap();

        std::fs::write(store.body_path(&key, &name), b"tampered").unwrap();
        let err = store.load_verified(&key).unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));

        store.remove_body(&key, &name).unwrap();
        let err = store.load_verified(&key).unwrap_err();
        assert!(matches!(err, CacheError::MissingBody(_)));

        // removing twice is fine
        store.remove_body(&key, &name).unwrap();
    }
}
