use std::time::{Duration, SystemTime};

use filetime::FileTime;
use restcache::caching::CacheRecord;
use restcache::response::Trace;
use restcache::status::Status;

use crate::{HitCounter, record_path, setup_client};

#[tokio::test]
async fn test_fetch_and_cache() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("json/a").as_str())
        .build()
        .unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.trace(), Trace::Network);
    assert_eq!(response.mime_type(), Some("application/json"));
    assert_eq!(
        response.content_as_json().unwrap(),
        serde_json::json!({"ok": true})
    );

    // the server declares `max-age=60`
    let response = client.resolve(&request).await;
    assert_eq!(response.trace(), Trace::Cached);
    assert_eq!(response.content_as_string().unwrap(), r#"{"ok":true}"#);
    assert_eq!(server.accesses(), 1);

    let properties = std::fs::read_to_string(record_path(&client, &request)).unwrap();
    let record = CacheRecord::from_properties(&properties, SystemTime::now()).unwrap();
    assert_eq!(record.status, 200);
    assert_eq!(record.file_list.len(), 1);
    assert_eq!(
        record.results_sha1,
        restcache::caching::sha1_base64(br#"{"ok":true}"#)
    );
}

#[tokio::test]
async fn test_transport_root_directory() {
    let (client, cache_dir) = setup_client(|config| config.transport_root = "api-v2".into());
    let server = HitCounter::new();

    let request = client
        .request(server.url("json/root").as_str())
        .build()
        .unwrap();
    client.resolve(&request).await;

    let path = record_path(&client, &request);
    assert!(path.starts_with(cache_dir.path().join("api-v2")));
    assert!(path.is_file());
    assert!(!cache_dir.path().join("rest").exists());
}

#[tokio::test]
async fn test_params_share_cache_entry() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let first = client
        .request(server.url("json/params?b=2&a=1").as_str())
        .build()
        .unwrap();
    let second = client
        .request(server.url("json/params").as_str())
        .add_param("a", "1")
        .add_param("b", "2")
        .build()
        .unwrap();
    assert_eq!(first.cache_key(), second.cache_key());

    client.resolve(&first).await;
    let response = client.resolve(&second).await;
    assert_eq!(response.trace(), Trace::Cached);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_coalescing() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("delay/200ms/coalesced").as_str())
        .build()
        .unwrap();

    let responses = futures::future::join_all((0..5).map(|_| client.resolve(&request))).await;
    for response in responses {
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.trace(), Trace::Network);
    }
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_error_status_cached() {
    let (client, _cache_dir) = setup_client(|config| {
        config.error_cache_period = Duration::from_secs(60);
    });
    let server = HitCounter::new();

    let request = client
        .request(server.url("text/404/nobody").as_str())
        .build()
        .unwrap();

    for trace in [Trace::Network, Trace::Cached] {
        let response = client.resolve(&request).await;
        assert_eq!(response.trace(), trace);
        let err = response.check_status().unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().ends_with(": nobody"));
    }
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_redirect_cached() {
    let (client, _cache_dir) = setup_client(|config| {
        config.min_cache_period = Duration::from_secs(60);
    });
    let server = HitCounter::new();

    let request = client
        .request(server.url("redirect/json/target").as_str())
        .build()
        .unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.status(), Status::Found);
    assert_eq!(response.redirection(), Some("/json/target"));

    let response = client.resolve(&request).await;
    assert_eq!(response.trace(), Trace::Cached);
    assert_eq!(response.redirection(), Some("/json/target"));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_prefetch_on_disk() {
    let (client, _cache_dir) = setup_client(|config| {
        config.min_cache_period = Duration::from_secs(100);
    });
    let server = HitCounter::new();

    let request = client
        .request(server.url("text/200/hello").as_str())
        .build()
        .unwrap();
    client.resolve(&request).await;
    assert_eq!(server.accesses(), 1);

    let path = record_path(&client, &request);
    let aged = SystemTime::now() - Duration::from_secs(75);
    filetime::set_file_mtime(&path, FileTime::from_system_time(aged)).unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.trace(), Trace::Prefetch);
    assert_eq!(response.content_as_string().unwrap(), "hello");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.accesses(), 1);

    let response = client.resolve(&request).await;
    assert_eq!(response.trace(), Trace::Cached);

    let properties = std::fs::read_to_string(&path).unwrap();
    let record = CacheRecord::from_properties(&properties, SystemTime::now()).unwrap();
    assert_eq!(record.file_list.len(), 2);
}

#[tokio::test]
async fn test_corrupted_body_refetches() {
    let (client, _cache_dir) = setup_client(|config| {
        config.min_cache_period = Duration::from_secs(100);
    });
    let server = HitCounter::new();

    let request = client
        .request(server.url("text/200/intact").as_str())
        .build()
        .unwrap();
    client.resolve(&request).await;

    let path = record_path(&client, &request);
    let properties = std::fs::read_to_string(&path).unwrap();
    let record = CacheRecord::from_properties(&properties, SystemTime::now()).unwrap();
    let body = path.with_file_name(record.current_body().unwrap());
    std::fs::write(body, "tampered").unwrap();

    let response = client.resolve(&request).await;
    assert_eq!(response.trace(), Trace::Network);
    assert_eq!(response.content_as_string().unwrap(), "intact");
    assert_eq!(server.accesses(), 2);
}
