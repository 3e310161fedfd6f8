use restcache::response::Trace;
use restcache::rest::{Authorization, Body, Method};
use restcache::status::Status;

use crate::{HitCounter, record_path, setup_client};

#[tokio::test]
async fn test_post_echo() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("echo").as_str())
        .method(Method::Post)
        .body(Body::xml("<user><name>x</name></user>"))
        .build()
        .unwrap();

    for _ in 0..2 {
        let response = client.get_response(&request).await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.trace(), Trace::Network);
        assert_eq!(response.mime_type(), Some("application/xml"));
        let document = response.content_as_xml().unwrap();
        assert_eq!(document.root_element(), Some("user"));
    }

    assert_eq!(server.accesses(), 2);
    assert!(!record_path(&client, &request).exists());
}

#[tokio::test]
async fn test_file_body() {
    let (client, cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let path = cache_dir.path().join("upload.json");
    std::fs::write(&path, r#"{"id":7}"#).unwrap();

    let request = client
        .request(server.url("echo").as_str())
        .method(Method::Post)
        .body(Body::File(path.clone()))
        .content_type("application/json")
        .disposition_type("attachment")
        .build()
        .unwrap();

    let response = client.get_response_and_check(&request).await.unwrap();
    assert_eq!(response.content_as_string().unwrap(), r#"{"id":7}"#);
    // files handed in by the caller are left alone
    assert!(path.exists());
}

#[tokio::test]
async fn test_method_override() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("method?_method=PUT").as_str())
        .method(Method::Post)
        .build()
        .unwrap();
    assert_eq!(request.method(), Method::Put);

    let response = client.get_response(&request).await;
    assert_eq!(response.content_as_string().unwrap(), "POST");

    let request = client
        .request(server.url("method").as_str())
        .method(Method::Delete)
        .build()
        .unwrap();
    let response = client.get_response(&request).await;
    assert_eq!(response.content_as_string().unwrap(), "DELETE");
}

#[tokio::test]
async fn test_auth_and_agent_headers() {
    let (client, _cache_dir) = setup_client(|_| {});
    let server = HitCounter::new();

    let request = client
        .request(server.url("headers").as_str())
        .authorization(Authorization::Basic {
            user: "user".into(),
            password: "pass".into(),
            domain: None,
        })
        .agent("integration-test")
        .build()
        .unwrap();

    let response = client.get_response(&request).await;
    assert_eq!(
        response.content_as_string().unwrap(),
        "authorization: Basic dXNlcjpwYXNz\nuser-agent: integration-test"
    );
}
