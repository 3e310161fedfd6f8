use std::time::Duration;

use restcache::response::Trace;
use restcache::status::Status;

use crate::{HitCounter, refused_url, setup_client};

#[tokio::test]
async fn test_connection_refused() {
    let (client, _cache_dir) = setup_client(|_| {});

    let request = client
        .request(refused_url("nothing").as_str())
        .build()
        .unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.status(), Status::WebServerIsDown);
    assert_eq!(response.trace(), Trace::Unknown);
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn test_timeout() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("delay/1h/slow").as_str())
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let response = client.resolve(&request).await;
    assert!(response.status().is_timeout());
    assert!(response.check_status().is_err());
}

#[tokio::test]
async fn test_stale_block_without_cache() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("delay/1h/stale").as_str())
        .stale_block_period(Duration::from_millis(200))
        .build()
        .unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.status(), Status::GatewayTimeout);
}

#[tokio::test]
async fn test_server_error_status() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("respond_statuscode/503/down").as_str())
        .build()
        .unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.status(), Status::ServiceUnavailable);
    assert_eq!(response.trace(), Trace::Network);
    assert_eq!(response.check_status().unwrap_err().status(), Status::ServiceUnavailable);
}
