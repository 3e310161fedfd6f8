//! Helpers for testing the ReST cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test, e.g. `let cache_dir = restcache_test::tempdir();`.
//!
//!  - When using [`HitCounter`], hold on to it until all requests have been made. Once it is
//!    dropped, the server stops and connections to it are refused.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{any, get, post};
use axum::{Router, middleware};
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::util::SubscriberInitExt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `restcache` crate and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("restcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Runs `f` with a subscriber that records every event on the current thread.
///
/// Returns the recorded output, one line per event starting with the level, e.g.
/// `WARN ReST call failed ...`.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let _guard = fmt()
        .with_env_filter(EnvFilter::new("trace"))
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish()
        .set_default();

    f();

    let output = buffer.0.lock().unwrap();
    String::from_utf8_lossy(&output).into_owned()
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.0.lock().unwrap(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Serves `router` on a random local port.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns a URL on a local port that nothing listens on.
pub fn refused_url(path: &str) -> Url {
    let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let path = path.trim_start_matches('/');
    format!("http://127.0.0.1:{port}/{path}").parse().unwrap()
}

/// A test server counting the hits per request URI.
///
/// Routes:
///  - `/json/*tail`: a JSON object, cacheable for a minute.
///  - `/text/:status/*tail`: the tail as `text/plain`, with the given status.
///  - `/respond_statuscode/:num/*tail`: an empty response with the given status.
///  - `/delay/:time/*tail`: a JSON object after waiting for `time`, e.g. `500ms`.
///  - `/redirect/*path`: a redirect to `/path`.
///  - `/echo`: echoes a POSTed body and its content type.
///  - `/method`: the request method.
///  - `/headers`: the `Authorization` and `User-Agent` headers as `text/plain`.
pub struct HitCounter {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl HitCounter {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri,
                  req: extract::Request,
                  next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/json/*tail",
                get(|| async {
                    (
                        [
                            (header::CONTENT_TYPE, "application/json"),
                            (header::CACHE_CONTROL, "public, max-age=60"),
                        ],
                        r#"{"ok":true}"#,
                    )
                }),
            )
            .route(
                "/text/:status/*tail",
                get(
                    |extract::Path((status, tail)): extract::Path<(u16, String)>| async move {
                        let status =
                            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                        (status, [(header::CONTENT_TYPE, "text/plain")], tail)
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/delay/:time/*tail",
                get(
                    |extract::Path((time, _)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        ([(header::CONTENT_TYPE, "application/json")], r#"{"ok":true}"#)
                    },
                ),
            )
            .route(
                "/redirect/*path",
                get(|extract::Path(path): extract::Path<String>| async move {
                    (StatusCode::FOUND, [(header::LOCATION, format!("/{path}"))])
                }),
            )
            .route(
                "/echo",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let content_type = headers
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_owned();
                    ([(header::CONTENT_TYPE, content_type)], body)
                }),
            )
            .route(
                "/method",
                any(|method: axum::http::Method| async move { method.to_string() }),
            )
            .route(
                "/headers",
                get(|headers: HeaderMap| async move {
                    let value = |name: header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-")
                            .to_owned()
                    };
                    let body = format!(
                        "authorization: {}\nuser-agent: {}",
                        value(header::AUTHORIZATION),
                        value(header::USER_AGENT)
                    );
                    ([(header::CONTENT_TYPE, "text/plain")], body)
                }),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Returns the number of hits since the last call, and resets the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for HitCounter {
    fn default() -> Self {
        Self::new()
    }
}
