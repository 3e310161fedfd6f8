//! Execution of network calls.
//!
//! A [`Transport`] turns [`CallParams`] into a [`RestCall`], a one-shot unit of work that can
//! either be awaited directly or submitted to a runtime. When the call targets the cache, the
//! transport writes the body and the [`CacheRecord`] before the call completes.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::io::{self, Read, Seek};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::future::BoxFuture;
use tempfile::NamedTempFile;
use thiserror::Error;
use url::Url;

use crate::caching::{CacheKey, CacheRecord, RecordStore, StoredBody};
use crate::rest::{Authorization, Method};
use crate::status::Status;

mod http;

pub use http::{HttpTransport, create_client};

/// Where the result of a call is cached.
#[derive(Debug, Clone)]
pub struct CacheTarget {
    pub key: CacheKey,
    /// The record being superseded, whose body history is carried over.
    pub existing: Option<CacheRecord>,
}

/// Everything a transport needs to perform a call.
#[derive(Debug, Clone)]
pub struct CallParams {
    /// The method sent on the wire.
    pub method: Method,
    pub url: Url,
    pub authorization: Option<Authorization>,
    pub agent: String,
    /// Set for cacheable calls. Uncached calls return their body in memory.
    pub target: Option<CacheTarget>,
    /// A file to send as request body.
    pub body: Option<PathBuf>,
    /// Timeout of the whole call.
    pub timeout: Duration,
    pub disable_gzip: bool,
    pub content_type: Option<String>,
    pub disposition_type: Option<String>,
}

/// The outcome of a successful call.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// The record describing the response. For cached calls this was persisted already.
    pub record: CacheRecord,
    pub body: StoredBody,
}

pub type CallResult = Result<Fetched, TransportError>;

/// Maximum number of body file names kept in the history of a record.
const MAX_FILE_HISTORY: usize = 8;

/// Response metadata as received from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub mime_type: Option<String>,
    pub cache_control: Option<String>,
    pub location: Option<String>,
}

/// Finishes a call whose body was downloaded into `body`.
///
/// For cached calls the body is moved into `store` and a new record superseding the existing one
/// is written. Bodies falling out of the record's history are deleted. Uncached calls get their
/// body back in memory.
pub fn persist_response(
    store: &dyn RecordStore,
    target: Option<&CacheTarget>,
    meta: ResponseMeta,
    mut body: NamedTempFile,
    checksum: String,
) -> CallResult {
    let storage_error =
        |e: io::Error| TransportError::Unknown(format!("failed to store response: {e}"));

    let mut record = CacheRecord {
        file_list: Vec::new(),
        results_sha1: checksum,
        status: meta.status,
        mime_type: meta.mime_type,
        cache_control: meta.cache_control,
        location: meta.location,
        last_modified: SystemTime::now(),
    };

    let Some(target) = target else {
        let mut data = Vec::new();
        body.rewind().map_err(storage_error)?;
        body.read_to_end(&mut data).map_err(storage_error)?;
        return Ok(Fetched {
            record,
            body: StoredBody::Data(Bytes::from(data)),
        });
    };

    let name = store
        .store_body(&target.key, body)
        .map_err(storage_error)?;

    let mut file_list = target
        .existing
        .as_ref()
        .map(|existing| existing.file_list.clone())
        .unwrap_or_default();
    file_list.push(name.clone());
    let excess = file_list.len().saturating_sub(MAX_FILE_HISTORY);
    for old in file_list.drain(..excess) {
        if let Err(e) = store.remove_body(&target.key, &old) {
            let dynerr: &dyn Error = &e;
            tracing::warn!(error = dynerr, body = old, "failed to remove superseded body");
        }
    }
    record.file_list = file_list;

    store.put(&target.key, &record).map_err(storage_error)?;

    let body = store
        .load_body(&target.key, &name)
        .map_err(|e| TransportError::Unknown(format!("failed to load stored response: {e}")))?;
    Ok(Fetched { record, body })
}

/// A network failure, classified by what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("certificate rejected: {0}")]
    Certificate(String),
    #[error("SSL handshake failed: {0}")]
    Ssl(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("read timed out: {0}")]
    ReadTimeout(String),
    /// Anything that could not be classified.
    #[error("call failed: {0}")]
    Unknown(String),
}

impl TransportError {
    /// The status reported in place of a response.
    pub fn status(&self) -> Status {
        match self {
            Self::UnknownHost(_) => Status::ServiceUnavailable,
            Self::Certificate(_) => Status::InvalidSslCertificate,
            Self::Ssl(_) => Status::SslHandshakeFailed,
            Self::Connect(_) => Status::WebServerIsDown,
            Self::ReadTimeout(_) => Status::NetworkReadTimeout,
            Self::Unknown(_) => Status::UnknownError,
        }
    }

    /// Logs the failure: expected failures as warning, anything unclassified as error.
    pub fn log(&self, url: &Url) {
        let dynerr: &dyn Error = self; // tracing expects a `&dyn Error`
        match self {
            Self::Unknown(_) => tracing::error!(error = dynerr, %url, "ReST call failed"),
            _ => tracing::warn!(error = dynerr, %url, "ReST call failed"),
        }
    }

    /// Classifies an arbitrary error by walking its source chain.
    pub fn classify(error: &(dyn Error + 'static)) -> Self {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        let mut root = error;
        let mut io_kind = None;
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                io_kind.get_or_insert(io_err.kind());
            }
            root = err;
            current = err.source();
        }

        let message = root.to_string();
        // Special-case a few error strings
        let lower = message.to_ascii_lowercase();
        if lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
            || lower.contains("no such host")
            || lower.contains("nodename nor servname")
        {
            return Self::UnknownHost(message);
        }
        if lower.contains("certificate") {
            return Self::Certificate(message);
        }
        if message.contains("SSL routines")
            || lower.contains("handshake")
            || lower.contains("received fatal alert")
        {
            return Self::Ssl(message);
        }

        match io_kind {
            Some(
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::AddrNotAvailable,
            ) => Self::Connect(message),
            Some(io::ErrorKind::TimedOut) => Self::ReadTimeout(message),
            _ => Self::Unknown(message),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        match Self::classify(&error) {
            Self::Unknown(message) if error.is_timeout() && error.is_connect() => {
                Self::Connect(message)
            }
            Self::Unknown(message) if error.is_timeout() => Self::ReadTimeout(message),
            Self::Unknown(message) if error.is_connect() => Self::Connect(message),
            classified => classified,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        Self::classify(&error)
    }
}

/// A single deferred network call.
///
/// Nothing happens until the call is awaited with [`call`](Self::call) or spawned with
/// [`submit`](Self::submit).
pub struct RestCall {
    timeout: Duration,
    future: BoxFuture<'static, CallResult>,
}

impl fmt::Debug for RestCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestCall")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RestCall {
    pub fn new<F>(timeout: Duration, future: F) -> Self
    where
        F: Future<Output = CallResult> + Send + 'static,
    {
        Self {
            timeout,
            future: Box::pin(future),
        }
    }

    /// The timeout this call was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the call to completion.
    pub async fn call(self) -> CallResult {
        self.future.await
    }

    /// Spawns the call onto `handle`. Aborting the returned handle cancels the call.
    pub fn submit(self, handle: &tokio::runtime::Handle) -> tokio::task::JoinHandle<CallResult> {
        handle.spawn(self.future)
    }
}

/// Performs network calls.
///
/// A transport writes into the [`RecordStore`] it was created with. With the file system store
/// that is the tree named by [`Config::transport_root`](crate::config::Config::transport_root).
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// Creates a call for `params`.
    fn make_rest_call(&self, params: CallParams) -> RestCall;
}
