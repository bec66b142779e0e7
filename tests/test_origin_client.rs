//! Integration tests for the bot-API origin client

use futures::StreamExt;
use http::StatusCode;
use media_relay::{BotApiOrigin, FileId, Origin, RelayError, ResolvedPath};
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:abc";

fn client(server: &MockServer) -> BotApiOrigin {
    BotApiOrigin::with_timeouts(
        &server.uri(),
        TOKEN,
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn file_id() -> FileId {
    FileId::parse("AgACAgIAAx0CZ").unwrap()
}

#[tokio::test]
async fn test_resolve_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .and(query_param("file_id", "AgACAgIAAx0CZ"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"ok":true,"result":{"file_id":"AgACAgIAAx0CZ","file_size":4,"file_path":"photos/file_12.jpg"}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resolved = client(&server).resolve(&file_id()).await.unwrap();
    assert_eq!(resolved.as_str(), "photos/file_12.jpg");
    assert_eq!(resolved.extension().as_deref(), Some("jpg"));
}

#[tokio::test]
async fn test_resolve_unknown_id_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: invalid file_id"}"#,
        ))
        .mount(&server)
        .await;

    let result = client(&server).resolve(&file_id()).await;
    assert!(matches!(result, Err(RelayError::NotFound(_))));
}

#[tokio::test]
async fn test_resolve_ok_false_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"ok":false,"description":"gone"}"#),
        )
        .mount(&server)
        .await;

    let result = client(&server).resolve(&file_id()).await;
    assert!(matches!(result, Err(RelayError::NotFound(_))));
}

#[tokio::test]
async fn test_resolve_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let result = client(&server).resolve(&file_id()).await;
    assert!(matches!(result, Err(RelayError::OriginUnavailable(_))));
}

#[tokio::test]
async fn test_resolve_malformed_body_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = client(&server).resolve(&file_id()).await;
    assert!(matches!(result, Err(RelayError::OriginUnavailable(_))));
}

#[tokio::test]
async fn test_resolve_timeout_does_not_leak_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let origin = BotApiOrigin::with_timeouts(
        &server.uri(),
        TOKEN,
        Duration::from_millis(100),
        Duration::from_millis(200),
    )
    .unwrap();

    match origin.resolve(&file_id()).await {
        Err(RelayError::OriginUnavailable(msg)) => assert!(!msg.contains(TOKEN)),
        other => panic!("expected OriginUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_download_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/photos/file_12.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8, 0xD8, 0xFF, 0xE0]))
        .expect(1)
        .mount(&server)
        .await;

    let data = client(&server)
        .download(&ResolvedPath::new("photos/file_12.jpg"))
        .await
        .unwrap();
    assert_eq!(&data[..], &[0xFF, 0xD8, 0xFF, 0xE0]);
}

#[tokio::test]
async fn test_download_empty_payload_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/photos/empty.jpg"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = client(&server)
        .download(&ResolvedPath::new("photos/empty.jpg"))
        .await;
    assert!(matches!(result, Err(RelayError::OriginUnavailable(_))));
}

#[tokio::test]
async fn test_download_error_status_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/photos/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = client(&server)
        .download(&ResolvedPath::new("photos/missing.jpg"))
        .await;
    assert!(matches!(result, Err(RelayError::OriginUnavailable(_))));
}

#[tokio::test]
async fn test_stream_forwards_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/videos/clip.mp4"))
        .and(header("range", "bytes=0-999"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-999/5000")
                .set_body_bytes(vec![7u8; 1000]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let upstream = client(&server)
        .stream(&ResolvedPath::new("videos/clip.mp4"), Some("bytes=0-999"))
        .await
        .unwrap();

    assert_eq!(upstream.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(upstream.content_length, Some(1000));
    assert_eq!(upstream.content_range.as_deref(), Some("bytes 0-999/5000"));

    let total: usize = upstream
        .body
        .map(|chunk| chunk.unwrap().len())
        .fold(0, |acc, n| async move { acc + n })
        .await;
    assert_eq!(total, 1000);
}

#[tokio::test]
async fn test_stream_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/videos/missing.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/videos/short.mp4"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/videos/broken.mp4"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let origin = client(&server);

    let missing = origin.stream(&ResolvedPath::new("videos/missing.mp4"), None).await;
    assert!(matches!(missing, Err(RelayError::NotFound(_))));

    let short = origin
        .stream(&ResolvedPath::new("videos/short.mp4"), Some("bytes=9000-"))
        .await;
    assert!(matches!(short, Err(RelayError::UnsatisfiableRange(_))));

    let broken = origin.stream(&ResolvedPath::new("videos/broken.mp4"), None).await;
    assert!(matches!(broken, Err(RelayError::RelayFailed(_))));
}
