//! The cache coordinator.
//!
//! [`RestClient::resolve`] serves cacheable requests. It looks up the [`CacheRecord`] for the
//! request's [`CacheKey`](crate::caching::CacheKey), decides on its [`Freshness`], and either
//! answers from the cache, answers from the cache while a refresh runs in the background, or
//! waits for a network call within the bounds of the request's [`BlockPolicy`].
//!
//! Network calls for one key are coalesced through the [`InFlightRegistry`]: callers arriving
//! while a call is running join it instead of starting their own. Calls run as spawned tasks and
//! are not cancelled when a caller stops waiting, so a slow response still lands in the cache for
//! the next caller.
//!
//! [`RestClient::write`] serves everything else. Those requests never touch the cache or the
//! registry.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use sentry::{Hub, SentryFutureExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::caching::{CacheRecord, FsRecordStore, RecordStore, StoredBody};
use crate::config::Config;
use crate::error::StatusError;
use crate::response::{Response, Trace};
use crate::status::Status;
use crate::transport::{CacheTarget, CallParams, HttpTransport, Transport, TransportError};
use crate::utils::defer::defer;

pub mod freshness;
mod registry;
mod request;
mod url;


pub use freshness::Freshness;
pub use registry::{InFlightCall, InFlightRegistry, Registration};
pub use request::{Authorization, BlockPolicy, Body, Method, RequestBuilder, RestRequest};
pub use self::url::{QueryParams, find_invalid_char};

/// Stands in for deadlines that cannot be represented, roughly 30 years out.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A client that serves ReST calls through the response cache.
///
/// Cloning is cheap, all clones share the same registry and concurrency limit.
#[derive(Debug, Clone)]
pub struct RestClient {
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    registry: Arc<InFlightRegistry>,
    permits: Arc<Semaphore>,
}

impl RestClient {
    pub fn new(config: Config, store: Arc<dyn RecordStore>, transport: Arc<dyn Transport>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls.max(1)));
        Self {
            config: Arc::new(config),
            store,
            transport,
            registry: Default::default(),
            permits,
        }
    }

    /// Creates a client caching on disk and talking HTTP, as configured by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(
            FsRecordStore::from_config(&config).context("failed to create cache directories")?,
        );
        let transport =
            HttpTransport::new(&config, store.clone()).context("failed to create HTTP client")?;
        Ok(Self::new(config, store, Arc::new(transport)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The calls currently in flight.
    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Starts building a request for `url`, with defaults taken from the client configuration.
    pub fn request(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(url, &self.config)
    }

    /// Serves `request` through [`resolve`](Self::resolve) or [`write`](Self::write), depending
    /// on its method.
    pub async fn get_response(&self, request: &RestRequest) -> Response {
        if request.method().is_cacheable() {
            self.resolve(request).await
        } else {
            self.write(request).await
        }
    }

    /// Like [`get_response`](Self::get_response), but turns error statuses into a
    /// [`StatusError`].
    pub async fn get_response_and_check(
        &self,
        request: &RestRequest,
    ) -> Result<Response, StatusError> {
        let response = self.get_response(request).await;
        response.check_status()?;
        Ok(response)
    }

    /// Serves a cacheable request.
    #[tracing::instrument(skip_all, fields(url = %request.url(), key = %request.cache_key()))]
    pub async fn resolve(&self, request: &RestRequest) -> Response {
        metric!(counter("rest.access") += 1, "method" => request.method().as_str());

        if request.exceeds_url_length() {
            return self.reject_url_length(request);
        }

        let key = request.cache_key();
        let cached = match self.store.load_verified(key) {
            Ok(cached) => cached,
            Err(err) => {
                sentry::with_scope(
                    |scope| scope.set_extra("cache_key", key.to_string().into()),
                    || err.log(key),
                );
                None
            }
        };

        let stale = match cached {
            Some((record, body)) => {
                let ttl = freshness::effective_ttl(
                    &record,
                    request.min_cache_period(),
                    request.error_cache_period(),
                );
                match freshness::classify(record.last_modified, ttl, SystemTime::now()) {
                    Freshness::Fresh => {
                        metric!(counter("rest.cache.hit") += 1);
                        return self.cached_response(&record, body, Trace::Cached);
                    }
                    Freshness::Refresh => {
                        metric!(counter("rest.prefetch") += 1);
                        tracing::debug!("refreshing cache entry in the background");
                        self.start_call(request, Some(record.clone()), self.call_timeout(request));
                        return self.cached_response(&record, body, Trace::Prefetch);
                    }
                    Freshness::Expired => Some((record, body)),
                }
            }
            None => None,
        };

        self.fetch(request, stale).await
    }

    /// Waits for a network call within the limits of the request's [`BlockPolicy`], falling
    /// back to `stale` where the policy allows.
    async fn fetch(
        &self,
        request: &RestRequest,
        stale: Option<(CacheRecord, StoredBody)>,
    ) -> Response {
        let policy = request.policy();
        let budget = match (policy, &stale) {
            (BlockPolicy::Timeout(d) | BlockPolicy::StaleBlock(d), _) => d,
            (BlockPolicy::MaxBlock(d), Some(_)) => d,
            (BlockPolicy::MaxBlock(_) | BlockPolicy::Default, _) => self.config.timeouts.max_block,
        };
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let caller_timeout = self.call_timeout(request);
        let existing = stale.as_ref().map(|(record, _)| record.clone());

        let mut call = self.start_call(request, existing.clone(), caller_timeout);
        loop {
            match tokio::time::timeout_at(deadline, call.wait()).await {
                Ok(Ok(fetched)) => {
                    return self.cached_response(&fetched.record, fetched.body, Trace::Network);
                }
                // A joined call with a shorter timeout gave up early. Try again with ours.
                Ok(Err(TransportError::ReadTimeout(_)))
                    if call.timeout() < caller_timeout && Instant::now() < deadline =>
                {
                    tracing::debug!(
                        timeout = ?call.timeout(),
                        "joined call timed out early, starting a new one"
                    );
                    call = self.start_call(request, existing.clone(), caller_timeout);
                }
                Ok(Err(err)) => {
                    return Response::synthetic(err.status(), err.to_string(), self.store.tmp_dir());
                }
                Err(_elapsed) => break,
            }
        }

        match (policy, stale) {
            (BlockPolicy::MaxBlock(_), Some((record, body))) => {
                metric!(counter("rest.stale") += 1, "policy" => "max_block");
                self.cached_response(&record, body, Trace::Prefetch)
            }
            (BlockPolicy::StaleBlock(_) | BlockPolicy::Default, Some((record, body))) => {
                metric!(counter("rest.stale") += 1, "policy" => "stale_block");
                self.cached_response(&record, body, Trace::Stale)
            }
            _ => Response::synthetic(
                Status::GatewayTimeout,
                format!(
                    "no response within {}",
                    humantime::format_duration(budget)
                ),
                self.store.tmp_dir(),
            ),
        }
    }

    /// Starts a network call for `request`, or joins the one already in flight.
    ///
    /// The call runs on its own task. It unregisters itself before publishing its result, so
    /// that callers that see the result never join the finished call again.
    fn start_call(
        &self,
        request: &RestRequest,
        existing: Option<CacheRecord>,
        timeout: Duration,
    ) -> InFlightCall {
        let key = request.cache_key();
        let (call, sender) = match self.registry.insert_if_absent(key, timeout) {
            Registration::Joined(call) => {
                metric!(counter("rest.coalesced") += 1);
                return call;
            }
            Registration::Inserted(call, sender) => (call, sender),
        };
        metric!(counter("rest.network") += 1, "method" => request.method().as_str());

        let params = CallParams {
            method: request.wire_method(),
            url: request.url().clone(),
            authorization: request.authorization().cloned(),
            agent: request.agent().to_owned(),
            target: Some(CacheTarget {
                key: key.clone(),
                existing,
            }),
            body: None,
            timeout,
            disable_gzip: request.disable_gzip(),
            content_type: request.content_type().map(String::from),
            disposition_type: request.disposition_type().map(String::from),
        };
        let rest_call = self.transport.make_rest_call(params);

        // Runs on completion, and also when the task is dropped or aborted.
        let unregister = {
            let registry = self.registry.clone();
            let key = key.clone();
            let id = call.id();
            defer(move || {
                registry.remove(&key, id);
            })
        };

        let permits = self.permits.clone();
        let url = request.url().clone();
        let key = key.clone();
        let task = async move {
            let _permit = permits.acquire_owned().await;
            let result = rest_call.call().await;
            if let Err(err) = &result {
                metric!(counter("rest.failure") += 1, "status" => err.status().label());
                sentry::with_scope(
                    |scope| scope.set_extra("cache_key", key.to_string().into()),
                    || err.log(&url),
                );
            }
            unregister.run();
            // Nobody waiting is fine, the result is in the cache.
            let _ = sender.send(result);
        };
        tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())));

        call
    }

    /// Serves a request that must not be cached.
    ///
    /// The call is made exactly once, without coalescing. An in-memory body is written to a
    /// temporary file that is removed once the call is done.
    #[tracing::instrument(skip_all, fields(method = %request.wire_method(), url = %request.url()))]
    pub async fn write(&self, request: &RestRequest) -> Response {
        metric!(counter("rest.access") += 1, "method" => request.method().as_str());

        if request.exceeds_url_length() {
            return self.reject_url_length(request);
        }

        let tmp_dir = self.store.tmp_dir();
        let mut content_type = request.content_type().map(String::from);
        let mut document = None;
        let body = match request.body() {
            Some(Body::File(path)) => Some(path.clone()),
            Some(Body::Document {
                content_type: document_type,
                data,
            }) => {
                let file = self.store.tempfile().and_then(|mut file| {
                    file.write_all(data)?;
                    file.flush()?;
                    Ok(file)
                });
                let file = match file {
                    Ok(file) => file,
                    Err(err) => {
                        let dynerr: &dyn std::error::Error = &err;
                        tracing::error!(error = dynerr, "failed to write request body");
                        return Response::synthetic(
                            Status::UnknownError,
                            format!("failed to write request body: {err}"),
                            tmp_dir,
                        );
                    }
                };
                content_type.get_or_insert_with(|| document_type.clone());
                let path = file.path().to_owned();
                document = Some(file);
                Some(path)
            }
            None => None,
        };

        let params = CallParams {
            method: request.wire_method(),
            url: request.url().clone(),
            authorization: request.authorization().cloned(),
            agent: request.agent().to_owned(),
            target: None,
            body,
            timeout: self.call_timeout(request),
            disable_gzip: request.disable_gzip(),
            content_type,
            disposition_type: request.disposition_type().map(String::from),
        };

        metric!(counter("rest.network") += 1, "method" => request.method().as_str());
        let result = self.transport.make_rest_call(params).call().await;
        drop(document);

        match result {
            Ok(fetched) => self.cached_response(&fetched.record, fetched.body, Trace::Network),
            Err(err) => {
                metric!(counter("rest.failure") += 1, "status" => err.status().label());
                err.log(request.url());
                Response::synthetic(err.status(), err.to_string(), tmp_dir)
            }
        }
    }

    /// The timeout of a network call made for `request`.
    fn call_timeout(&self, request: &RestRequest) -> Duration {
        match request.policy() {
            BlockPolicy::Timeout(timeout) => timeout,
            _ => self.config.timeouts.call,
        }
    }

    fn cached_response(&self, record: &CacheRecord, body: StoredBody, trace: Trace) -> Response {
        Response::from_record(record, body, trace, self.store.tmp_dir())
    }

    fn reject_url_length(&self, request: &RestRequest) -> Response {
        tracing::warn!(
            length = request.url().as_str().len(),
            max = self.config.max_url_length,
            "rejecting request with overlong URL"
        );
        Response::synthetic(
            Status::BadRequest,
            format!(
                "URL exceeds {} characters",
                self.config.max_url_length
            ),
            self.store.tmp_dir(),
        )
    }
}
