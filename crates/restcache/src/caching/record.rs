use std::fmt::Write;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

use super::CacheError;

const FILE_LIST: &str = "file-list";
const RESULTS_SHA1: &str = "results-sha1";
const MIME_TYPE: &str = "mime-type";
const STATUS: &str = "status";
const CACHE_CONTROL: &str = "cache-control";
const LOCATION: &str = "location";

/// Metadata describing a cached response.
///
/// The record is stored as a properties file next to the body files it references. Only the
/// transport writes records, the coordinator reads them and never deletes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// History of body file names, the last one is the current body.
    pub file_list: Vec<String>,
    /// Base64 encoded SHA-1 of the current body.
    pub results_sha1: String,
    /// The HTTP status code of the response.
    pub status: u16,
    /// The `Content-Type` of the response.
    pub mime_type: Option<String>,
    /// The raw `Cache-Control` header of the response.
    pub cache_control: Option<String>,
    /// The `Location` header, for redirects.
    pub location: Option<String>,
    /// When the record was written. This is the modification time of the properties file and
    /// is not serialized.
    pub last_modified: SystemTime,
}

impl CacheRecord {
    /// Returns the file name of the current body.
    pub fn current_body(&self) -> Option<&str> {
        self.file_list.last().map(String::as_str)
    }

    /// Serializes the record in properties format.
    pub fn to_properties(&self) -> String {
        let mut out = String::from("#restcache record\n");
        let mut put = |key: &str, value: &str| {
            let _ = writeln!(out, "{key}={}", escape(value));
        };

        put(FILE_LIST, &self.file_list.join(","));
        put(RESULTS_SHA1, &self.results_sha1);
        put(MIME_TYPE, self.mime_type.as_deref().unwrap_or_default());
        put(STATUS, &self.status.to_string());
        if let Some(cache_control) = &self.cache_control {
            put(CACHE_CONTROL, cache_control);
        }
        if let Some(location) = &self.location {
            put(LOCATION, location);
        }
        out
    }

    /// Parses a record in properties format.
    ///
    /// `file-list`, `results-sha1`, `mime-type` and `status` are mandatory.
    pub fn from_properties(text: &str, last_modified: SystemTime) -> Result<Self, CacheError> {
        let mut file_list = None;
        let mut results_sha1 = None;
        let mut mime_type = None;
        let mut status = None;
        let mut cache_control = None;
        let mut location = None;

        for (key, value) in parse_properties(text) {
            match key.as_str() {
                FILE_LIST => {
                    file_list = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|name| !name.is_empty())
                            .map(String::from)
                            .collect::<Vec<_>>(),
                    )
                }
                RESULTS_SHA1 => results_sha1 = Some(value),
                MIME_TYPE => mime_type = Some(value),
                STATUS => {
                    status = Some(value.trim().parse::<u16>().map_err(|_| {
                        CacheError::MalformedField {
                            field: STATUS,
                            value: value.clone(),
                        }
                    })?)
                }
                CACHE_CONTROL => cache_control = Some(value),
                LOCATION => location = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            file_list: file_list.ok_or(CacheError::MissingField(FILE_LIST))?,
            results_sha1: results_sha1.ok_or(CacheError::MissingField(RESULTS_SHA1))?,
            mime_type: non_empty(mime_type.ok_or(CacheError::MissingField(MIME_TYPE))?),
            status: status.ok_or(CacheError::MissingField(STATUS))?,
            cache_control: cache_control.and_then(non_empty),
            location: location.and_then(non_empty),
            last_modified,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Returns the base64 encoded SHA-1 of `data`.
pub fn sha1_base64(data: &[u8]) -> String {
    BASE64.encode(Sha1::digest(data))
}

/// Returns the base64 encoded SHA-1 of the file at `path`.
pub fn sha1_base64_of_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(BASE64.encode(hasher.finalize()))
}

/// An incremental SHA-1 that yields the checksum format used in records.
#[derive(Debug, Default, Clone)]
pub struct BodyHasher(Sha1);

impl BodyHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish(self) -> String {
        BASE64.encode(self.0.finalize())
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Parses `key=value` lines, skipping comments and blank lines.
///
/// Keys end at the first unescaped `=` or `:`. Escapes are resolved in both keys and values.
fn parse_properties(text: &str) -> impl Iterator<Item = (String, String)> + '_ {
    text.lines().filter_map(|line| {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            return None;
        }

        let mut escaped = false;
        let mut split = line.len();
        for (idx, c) in line.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '=' | ':' => {
                    split = idx;
                    break;
                }
                _ => {}
            }
        }

        let key = unescape(line[..split].trim_end());
        let value = line.get(split + 1..).unwrap_or_default().trim_start();
        Some((key, unescape(value)))
    })
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    None => out.push_str(&hex),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CacheRecord {
        CacheRecord {
            file_list: vec!["first.body".into(), "second.body".into()],
            results_sha1: sha1_base64(br#"{"ok":true}"#),
            status: 302,
            mime_type: Some("application/json".into()),
            cache_control: Some("public, max-age=3600".into()),
            location: Some("http://x:80/moved".into()),
            last_modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_properties_format() {
        let record = record();
        insta::assert_snapshot!(record.to_properties().trim_end(), @r"
        #restcache record
        file-list=first.body,second.body
        results-sha1=Ai2R8hgEarLmHKwesT1qcY913ys\=
        mime-type=application/json
        status=302
        cache-control=public, max-age\=3600
        location=http\://x\:80/moved
        ");
    }

    #[test]
    fn test_parse_back() {
        let record = record();
        let parsed =
            CacheRecord::from_properties(&record.to_properties(), SystemTime::UNIX_EPOCH).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.current_body(), Some("second.body"));
    }

    #[test]
    fn test_parse_foreign_properties() {
        let text = "# written elsewhere\n\
                    status = 200\n\
                    mime-type:text/plain\n\
                    file-list=a.body\n\
                    results-sha1=abc\\=\n\
                    unknown=ignored\n";
        let parsed = CacheRecord::from_properties(text, SystemTime::UNIX_EPOCH).unwrap();

        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(parsed.results_sha1, "abc=");
        assert_eq!(parsed.cache_control, None);
    }

    #[test]
    fn test_missing_fields() {
        let text = "file-list=a.body\nstatus=200\nmime-type=\n";
        let err = CacheRecord::from_properties(text, SystemTime::UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, CacheError::MissingField("results-sha1")));

        let text = "file-list=a.body\nresults-sha1=abc\nstatus=two hundred\nmime-type=\n";
        let err = CacheRecord::from_properties(text, SystemTime::UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, CacheError::MalformedField { field: "status", .. }));
    }

    #[test]
    fn test_escapes() {
        let value = "line1\nline2\\tab\t=:";
        assert_eq!(unescape(&escape(value)), value);
        assert_eq!(unescape("caf\\u00e9"), "café");
    }

    #[test]
    fn test_incremental_hash() {
        let mut hasher = BodyHasher::default();
        hasher.update(b"{\"ok\"");
        hasher.update(b":true}");
        assert_eq!(hasher.finish(), sha1_base64(br#"{"ok":true}"#));
    }
}
