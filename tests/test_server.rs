//! HTTP-level tests for the relay server

use media_relay::{
    BotApiOrigin, DiskCache, MemoryAliasStore, MetadataCache, Relay, RelayConfig, RelayMetrics,
    RelayServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct RunningServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<media_relay::Result<()>>,
    _dir: TempDir,
}

impl RunningServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(origin: &MockServer) -> RunningServer {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(RelayConfig {
        origin_base_url: origin.uri(),
        bot_token: "123:abc".to_string(),
        cache_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    });

    let relay = Relay::new(
        config.clone(),
        Arc::new(MetadataCache::new(1000)),
        Arc::new(DiskCache::new(dir.path()).await.unwrap()),
        Arc::new(BotApiOrigin::new(&config).unwrap()),
        Arc::new(MemoryAliasStore::new()),
        RelayMetrics::new().unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let handle = tokio::spawn(RelayServer::new(Arc::new(relay)).serve(listener, async move {
        let _ = stopped.await;
    }));

    RunningServer {
        addr,
        stop: Some(stop),
        handle,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_health_metrics_and_stats() {
    let origin = MockServer::start().await;
    let server = start(&origin).await;
    let client = reqwest::Client::new();

    let health = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    // Generate one request so the metrics are non-empty
    let bad = client.get(server.url("/d/bad$id")).send().await.unwrap();
    assert_eq!(bad.status(), 400);
    assert_eq!(bad.text().await.unwrap(), "Invalid File ID");

    let metrics = client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
    let text = metrics.text().await.unwrap();
    assert!(text.contains("media_relay_requests_total{status=\"400\"} 1"));

    let stats: serde_json::Value = client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["metadata_cache"]["entries"], 0);
    assert_eq!(stats["disk_cache"]["writes"], 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_routing_errors() {
    let origin = MockServer::start().await;
    let server = start(&origin).await;
    let client = reqwest::Client::new();

    let post = client.post(server.url("/d/AgACAgIAAx0CZ")).send().await.unwrap();
    assert_eq!(post.status(), 405);

    let empty = client.get(server.url("/d/")).send().await.unwrap();
    assert_eq!(empty.status(), 400);

    let unknown = client.get(server.url("/some/nested/path")).send().await.unwrap();
    assert_eq!(unknown.status(), 404);

    let root = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(root.status(), 404);

    assert!(origin.received_requests().await.unwrap().is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn test_serves_media_over_http() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"ok":true,"result":{"file_path":"photos/file_1.png"}}"#,
        ))
        .expect(1)
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/photos/file_1.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89u8, b'P', b'N', b'G']))
        .expect(1)
        .mount(&origin)
        .await;

    let server = start(&origin).await;
    let client = reqwest::Client::new();

    for route in ["/d/AgACAgIAAx0CZ", "/AgACAgIAAx0CZ"] {
        let response = client.get(server.url(route)).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert_eq!(response.headers()["cache-control"], "max-age=3600");
        let body = response.bytes().await.unwrap();
        assert_eq!(&body[..], &[0x89, b'P', b'N', b'G']);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_streams_partial_content_over_http() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getFile"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"ok":true,"result":{"file_path":"videos/file_2.mp4"}}"#,
        ))
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:abc/videos/file_2.mp4"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-999/4000")
                .set_body_bytes(vec![9u8; 1000]),
        )
        .mount(&origin)
        .await;

    let server = start(&origin).await;
    let response = reqwest::Client::new()
        .get(server.url("/d/BAACAgIAAxkBAAI"))
        .header("Range", "bytes=0-999")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 206);
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert_eq!(response.headers()["content-range"], "bytes 0-999/4000");
    assert_eq!(response.bytes().await.unwrap().len(), 1000);

    server.shutdown().await;
}
