use std::io;

use thiserror::Error;

/// A problem with a cached entry.
///
/// None of these are surfaced to callers. A record that fails to load or verify is logged and
/// treated as if there was no cached entry at all.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The record references a body whose checksum does not match.
    #[error("checksum mismatch for body `{body}`: expected {expected}, got {actual}")]
    ChecksumMismatch {
        body: String,
        expected: String,
        actual: String,
    },
    /// The body file referenced by the record does not exist.
    #[error("missing body `{0}`")]
    MissingBody(String),
    /// The record is missing a mandatory field.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// A field of the record could not be parsed.
    #[error("malformed field `{field}`: {value:?}")]
    MalformedField { field: &'static str, value: String },
    /// Reading the record or its body failed.
    #[error("failed to read cache entry")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Logs this error as a warning, which is the only way cache problems become visible.
    pub fn log(&self, key: &super::CacheKey) {
        let dynerr: &dyn std::error::Error = self; // tracing expects a `&dyn Error`
        tracing::warn!(error = dynerr, %key, "ignoring unusable cache entry");
    }
}
