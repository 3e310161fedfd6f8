//! A [`Transport`] speaking HTTP through `reqwest`.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, header, redirect};

use crate::caching::{BodyHasher, RecordStore};
use crate::config::{Config, Timeouts};
use crate::rest::{Authorization, Method};

use super::{
    CallParams, CallResult, ResponseMeta, RestCall, Transport, TransportError, persist_response,
};

/// Creates a [`reqwest::Client`] with the provided options.
///
/// * `timeouts` controls the connect timeout. The call timeout is set per request.
/// * `gzip` toggles transparent decompression and the matching `Accept-Encoding`.
/// * Redirects are not followed, so that they end up in the cache like any other response.
pub fn create_client(timeouts: &Timeouts, gzip: bool) -> reqwest::Result<Client> {
    reqwest::ClientBuilder::new()
        .gzip(gzip)
        .connect_timeout(timeouts.connect)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(redirect::Policy::none())
        .build()
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Connect => reqwest::Method::CONNECT,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Transport implementation that performs calls over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    /// Used for requests that disable gzip.
    identity_client: Client,
    store: Arc<dyn RecordStore>,
}

impl HttpTransport {
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> reqwest::Result<Self> {
        Ok(Self {
            client: create_client(&config.timeouts, true)?,
            identity_client: create_client(&config.timeouts, false)?,
            store,
        })
    }
}

impl Transport for HttpTransport {
    fn make_rest_call(&self, params: CallParams) -> RestCall {
        let client = match params.disable_gzip {
            true => self.identity_client.clone(),
            false => self.client.clone(),
        };
        let store = self.store.clone();
        RestCall::new(params.timeout, execute(client, store, params))
    }
}

async fn execute(client: Client, store: Arc<dyn RecordStore>, params: CallParams) -> CallResult {
    tracing::debug!("Calling {} `{}`", params.method, params.url);
    let start = Instant::now();

    let mut builder = client
        .request(params.method.into(), params.url.clone())
        .timeout(params.timeout)
        .header(header::USER_AGENT, params.agent.as_str());

    builder = match &params.authorization {
        Some(Authorization::Basic {
            user,
            password,
            domain,
        }) => {
            let user = match domain {
                Some(domain) => format!("{domain}\\{user}"),
                None => user.clone(),
            };
            builder.basic_auth(user, Some(password))
        }
        Some(Authorization::Token(token)) => builder.bearer_auth(token),
        Some(Authorization::Custom(value)) => builder.header(header::AUTHORIZATION, value),
        None => builder,
    };

    if let Some(path) = &params.body {
        let data = tokio::fs::read(path).await?;
        if let Some(content_type) = &params.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(disposition) = &params.disposition_type {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default();
            builder = builder.header(
                header::CONTENT_DISPOSITION,
                format!("{disposition}; filename=\"{file_name}\""),
            );
        }
        builder = builder.body(data);
    }

    let mut response = builder.send().await?;

    let header_value = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    };
    let meta = ResponseMeta {
        status: response.status().as_u16(),
        mime_type: header_value(header::CONTENT_TYPE),
        cache_control: header_value(header::CACHE_CONTROL),
        location: header_value(header::LOCATION),
    };

    let mut body = store.tempfile()?;
    let mut hasher = BodyHasher::default();
    let mut size = 0;
    while let Some(chunk) = response.chunk().await? {
        hasher.update(&chunk);
        body.write_all(&chunk)?;
        size += chunk.len();
    }
    body.flush()?;

    let status = meta.status.to_string();
    metric!(timer("rest.call.duration") = start.elapsed(), "status" => &status);
    metric!(time_raw("rest.call.size") = size as u64);

    let target = params.target.clone();
    tokio::task::spawn_blocking(move || {
        persist_response(&*store, target.as_ref(), meta, body, hasher.finish())
    })
    .await
    .map_err(|e| TransportError::Unknown(format!("failed to store response: {e}")))?
}
