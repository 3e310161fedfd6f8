use std::fmt::{self, Write as _};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};

use crate::caching::{CacheRecord, StoredBody, sha1_base64, sha1_base64_of_file};
use crate::error::{ContentError, StatusError};
use crate::status::Status;

/// How a [`Response`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trace {
    /// Fetched from the network for this request.
    Network,
    /// Served from a fresh cache entry without any network call.
    Cached,
    /// Served from the cache while a refresh runs in the background.
    Prefetch,
    /// Served from an expired cache entry because the network call did not finish in time.
    Stale,
    /// Anything else, like rejected requests.
    Unknown,
}

impl Trace {
    pub fn as_str(self) -> &'static str {
        match self {
            Trace::Network => "network",
            Trace::Cached => "cached",
            Trace::Prefetch => "prefetch",
            Trace::Stale => "stale",
            Trace::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response content, available in memory, as a file, or both.
///
/// Whichever form is missing is materialized on first access and kept.
#[derive(Debug)]
struct Content {
    data: OnceCell<Bytes>,
    file: OnceCell<PathBuf>,
    /// Where in-memory content is written to when accessed as a file.
    tmp_dir: PathBuf,
}

impl Content {
    fn new(body: StoredBody, tmp_dir: PathBuf) -> Self {
        let (data, file) = match body {
            StoredBody::Data(data) => (OnceCell::with_value(data), OnceCell::new()),
            StoredBody::File(path) => (OnceCell::new(), OnceCell::with_value(path)),
        };
        Self {
            data,
            file,
            tmp_dir,
        }
    }

    fn bytes(&self) -> Result<&Bytes, ContentError> {
        self.data.get_or_try_init(|| {
            // One of the two is always set.
            let path = self.file.get().ok_or(ContentError::NotFound("content"))?;
            Ok(Bytes::from(std::fs::read(path)?))
        })
    }

    fn file(&self) -> Result<&Path, ContentError> {
        let path = self.file.get_or_try_init(|| {
            let data = self.data.get().ok_or(ContentError::NotFound("content"))?;
            materialize(&self.tmp_dir, data)
        })?;
        Ok(path)
    }
}

/// Writes `data` to a file named after its checksum, reusing an existing file with the same
/// checksum.
fn materialize(tmp_dir: &Path, data: &[u8]) -> Result<PathBuf, ContentError> {
    let mut name = String::with_capacity(48);
    for b in Sha1::digest(data) {
        let _ = write!(name, "{b:02x}");
    }
    name.push_str(".content");
    let path = tmp_dir.join(name);

    if path.is_file() && sha1_base64_of_file(&path).ok() == Some(sha1_base64(data)) {
        return Ok(path);
    }

    std::fs::create_dir_all(tmp_dir)?;
    let mut temp_file = tempfile::Builder::new()
        .prefix("tmp")
        .tempfile_in(tmp_dir)?;
    temp_file.write_all(data)?;
    temp_file.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}

/// The result of a ReST call.
///
/// Responses are immutable. Cloning is cheap and clones share lazily materialized content.
#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    mime_type: Option<String>,
    cache_control: Option<String>,
    redirection: Option<String>,
    trace: Trace,
    content: Arc<Content>,
}

impl Response {
    /// Creates a response from a cache record and its body.
    pub fn from_record(
        record: &CacheRecord,
        body: StoredBody,
        trace: Trace,
        tmp_dir: &Path,
    ) -> Self {
        let status = Status::find(record.status);
        Self {
            status,
            mime_type: record.mime_type.clone(),
            cache_control: record.cache_control.clone(),
            redirection: record
                .location
                .clone()
                .filter(|_| status.is_redirect()),
            trace,
            content: Arc::new(Content::new(body, tmp_dir.to_owned())),
        }
    }

    /// Creates a plain text response that did not come from a server.
    pub fn synthetic(status: Status, message: impl Into<String>, tmp_dir: &Path) -> Self {
        let message = message.into();
        Self {
            status,
            mime_type: Some("text/plain".into()),
            cache_control: None,
            redirection: None,
            trace: Trace::Unknown,
            content: Arc::new(Content::new(
                StoredBody::Data(Bytes::from(message)),
                tmp_dir.to_owned(),
            )),
        }
    }

    /// Returns the same response with a different [`Trace`].
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    /// The `Location` of a redirect.
    pub fn redirection(&self) -> Option<&str> {
        self.redirection.as_deref()
    }

    pub fn trace(&self) -> Trace {
        self.trace
    }

    pub fn content_as_bytes(&self) -> Result<Bytes, ContentError> {
        self.content.bytes().cloned()
    }

    pub fn content_as_string(&self) -> Result<String, ContentError> {
        Ok(String::from_utf8(self.content.bytes()?.to_vec())?)
    }

    /// Returns a file holding the content.
    ///
    /// In-memory content is written to a file named after its checksum on first access, so
    /// identical content is only ever written once.
    pub fn content_as_file(&self) -> Result<&Path, ContentError> {
        self.content.file()
    }

    /// Parses the content as a JSON object.
    pub fn content_as_json(&self) -> Result<serde_json::Value, ContentError> {
        self.deserialize_content()
    }

    /// Deserializes JSON content into `T`.
    ///
    /// Content that is not a JSON object fails with [`ContentError::NotFound`].
    pub fn deserialize_content<T: DeserializeOwned>(&self) -> Result<T, ContentError> {
        let bytes = self.content.bytes()?;
        if !bytes.trim_ascii_start().starts_with(b"{") {
            return Err(ContentError::NotFound("content is not a JSON object"));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Returns the content as an XML document.
    ///
    /// Content that does not start with markup fails with [`ContentError::NotFound`].
    pub fn content_as_xml(&self) -> Result<XmlDocument, ContentError> {
        XmlDocument::new(self.content_as_string()?)
    }

    /// Turns an error status into a [`StatusError`].
    ///
    /// Plain text bodies are appended to the error message.
    pub fn check_status(&self) -> Result<(), StatusError> {
        if !self.status.is_error() {
            return Ok(());
        }

        let mut message = self.status.description().to_owned();
        let is_text = self
            .mime_type()
            .is_some_and(|mime| mime.starts_with("text/plain"));
        if is_text {
            if let Ok(bytes) = self.content.bytes() {
                let text = String::from_utf8_lossy(bytes);
                let text = text.trim();
                if !text.is_empty() {
                    message = format!("{message}: {text}");
                }
            }
        }

        Err(StatusError::new(self.status, message))
    }
}

/// A textual XML document.
///
/// Only the document boundary is checked, parsing is left to the caller's XML library of choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument(String);

impl XmlDocument {
    fn new(text: String) -> Result<Self, ContentError> {
        let trimmed = text.trim_start_matches('\u{feff}').trim_start();
        if !trimmed.starts_with('<') {
            return Err(ContentError::NotFound("content is not an XML document"));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name of the root element, skipping the prolog, comments and doctype.
    pub fn root_element(&self) -> Option<&str> {
        let mut rest = self.0.trim_start_matches('\u{feff}');
        loop {
            let start = rest.find('<')?;
            rest = &rest[start + 1..];
            if rest.starts_with('?') || rest.starts_with('!') {
                let end = if rest.starts_with("!--") {
                    rest.find("-->")? + 3
                } else {
                    rest.find('>')? + 1
                };
                rest = &rest[end..];
                continue;
            }
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .unwrap_or(rest.len());
            return Some(&rest[..end]);
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::caching::sha1_base64;

    fn record(status: u16, mime: &str, body: &[u8]) -> CacheRecord {
        CacheRecord {
            file_list: vec!["body".into()],
            results_sha1: sha1_base64(body),
            status,
            mime_type: Some(mime.into()),
            cache_control: None,
            location: Some("http://x/elsewhere".into()),
            last_modified: SystemTime::now(),
        }
    }

    #[test]
    fn test_data_to_file() {
        let dir = restcache_test::tempdir();
        let record = record(200, "application/json", br#"{"ok":true}"#);
        let response = Response::from_record(
            &record,
            StoredBody::Data(Bytes::from_static(br#"{"ok":true}"#)),
            Trace::Network,
            dir.path(),
        );

        let path = response.content_as_file().unwrap().to_owned();
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), br#"{"ok":true}"#);
        // repeated access reuses the same file
        assert_eq!(response.content_as_file().unwrap(), path);

        // so does a different response with the same content
        let other = Response::synthetic(Status::Ok, r#"{"ok":true}"#, dir.path());
        assert_eq!(other.content_as_file().unwrap(), path);

        assert_eq!(response.content_as_json().unwrap()["ok"], true);
        assert_eq!(response.redirection(), None);
    }

    #[test]
    fn test_damaged_content_file_is_rewritten() {
        let dir = restcache_test::tempdir();
        let first = Response::synthetic(Status::Ok, "original", dir.path());
        let path = first.content_as_file().unwrap().to_owned();

        // same length, different content
        std::fs::write(&path, "damaged!").unwrap();

        let second = Response::synthetic(Status::Ok, "original", dir.path());
        assert_eq!(second.content_as_file().unwrap(), path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn test_file_to_data() {
        let dir = restcache_test::tempdir();
        let path = dir.path().join("body");
        std::fs::write(&path, "<?xml version=\"1.0\"?>\n<!-- hi --><root a=\"1\"/>").unwrap();

        let record = record(302, "application/xml", b"");
        let response =
            Response::from_record(&record, StoredBody::File(path.clone()), Trace::Cached, dir.path());

        assert_eq!(response.content_as_file().unwrap(), path);
        assert!(response.content_as_string().unwrap().contains("<root"));
        let xml = response.content_as_xml().unwrap();
        assert_eq!(xml.root_element(), Some("root"));
        assert_eq!(response.redirection(), Some("http://x/elsewhere"));

        let err = response.content_as_json().unwrap_err();
        assert!(matches!(err, ContentError::NotFound(_)));
    }

    #[test]
    fn test_check_status() {
        let dir = restcache_test::tempdir();
        let ok = Response::synthetic(Status::Ok, "fine", dir.path());
        assert!(ok.check_status().is_ok());

        let missing = Response::synthetic(Status::NotFound, "no such user\n", dir.path());
        let err = missing.check_status().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "not found: The server has not found anything matching the request URI.: no such user"
        );

        let record = record(409, "application/json", b"{}");
        let conflict = Response::from_record(
            &record,
            StoredBody::Data(Bytes::from_static(b"{}")),
            Trace::Network,
            dir.path(),
        );
        assert_eq!(
            conflict.check_status(),
            Err(StatusError::Conflict(
                "The request conflicts with the current state of the resource.".into()
            ))
        );
    }

    #[test]
    fn test_with_trace_shares_content() {
        let dir = restcache_test::tempdir();
        let response = Response::synthetic(Status::Ok, "shared", dir.path());
        let stale = response.clone().with_trace(Trace::Stale);

        assert_eq!(stale.trace(), Trace::Stale);
        assert_eq!(response.trace(), Trace::Unknown);
        assert_eq!(
            stale.content_as_file().unwrap(),
            response.content_as_file().unwrap()
        );
    }
}
