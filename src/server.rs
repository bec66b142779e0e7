//! HTTP front end
//!
//! Routes:
//! - `GET /d/{id}` and `GET /{id}`: relay a media object
//! - `GET /health`: liveness probe
//! - `GET /metrics`: Prometheus text format
//! - `GET /stats`: cache statistics as JSON

use crate::error::RelayError;
use crate::relay::{Relay, RelayBody, RelayOutcome, RelayRequest};
use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Response body: either a buffered payload or a relayed stream
pub type ResponseBody = UnsyncBoxBody<Bytes, RelayError>;

/// Serves relay requests over HTTP/1
pub struct RelayServer {
    relay: Arc<Relay>,
}

impl RelayServer {
    pub fn new(relay: Arc<Relay>) -> Self {
        RelayServer { relay }
    }

    /// Bind the configured listen address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr: SocketAddr = self
            .relay
            .config()
            .listen_address
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid listen address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    ///
    /// One task is spawned per connection. The metadata sweep runs for as
    /// long as the server does; queued disk writes are flushed on shutdown.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!("Media relay listening on http://{}", local);

        let sweeper = spawn_metadata_sweep(self.relay.clone());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping listener on {}", local);
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let relay = Arc::clone(&self.relay);

                    tokio::task::spawn(async move {
                        let service = service_fn(move |req| {
                            let relay = Arc::clone(&relay);
                            async move { handle_request(req, relay).await }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Error serving connection from {}: {:?}", peer, err);
                        }
                    });
                }
            }
        }

        sweeper.abort();
        self.relay.disk_cache().flush().await;
        Ok(())
    }
}

fn spawn_metadata_sweep(relay: Arc<Relay>) -> tokio::task::JoinHandle<()> {
    let period = relay.config().sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = relay.metadata_cache().purge_expired();
            if removed > 0 {
                debug!("Metadata sweep removed {} expired entries", removed);
            }
        }
    })
}

async fn handle_request<B>(
    req: Request<B>,
    relay: Arc<Relay>,
) -> Result<Response<ResponseBody>, Infallible> {
    let (parts, _body) = req.into_parts();
    Ok(route(&relay, &parts.method, parts.uri.path(), parts.headers).await)
}

/// Dispatch a request by method and path
pub async fn route(
    relay: &Relay,
    method: &Method,
    path: &str,
    headers: HeaderMap,
) -> Response<ResponseBody> {
    if method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    match path {
        "/health" => text_response(StatusCode::OK, "OK"),
        "/metrics" => metrics_response(relay),
        "/stats" => stats_response(relay),
        "/" => text_response(StatusCode::NOT_FOUND, "Not Found"),
        _ => match media_id(path) {
            Some(raw_id) => {
                let outcome = relay.handle(RelayRequest::new(raw_id, headers)).await;
                outcome_response(outcome)
            }
            None => text_response(StatusCode::NOT_FOUND, "Not Found"),
        },
    }
}

/// Extract the id parameter from `/d/{id}` or `/{id}`
fn media_id(path: &str) -> Option<&str> {
    if let Some(rest) = path.strip_prefix("/d/") {
        return Some(rest);
    }
    let rest = path.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

fn outcome_response(outcome: RelayOutcome) -> Response<ResponseBody> {
    match outcome {
        RelayOutcome::Served {
            status,
            headers,
            body,
        } => {
            let body = match body {
                RelayBody::Buffered(bytes) => full(bytes),
                RelayBody::Stream(buffer) => {
                    StreamBody::new(buffer.map_ok(Frame::data)).boxed_unsync()
                }
            };
            let mut response = Response::new(body);
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        RelayOutcome::Failed { status, reason } => text_response(status, &reason),
    }
}

fn metrics_response(relay: &Relay) -> Response<ResponseBody> {
    match relay.metrics().encode() {
        Ok(text) => {
            let mut response = Response::new(full(Bytes::from(text)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn stats_response(relay: &Relay) -> Response<ResponseBody> {
    let body = serde_json::json!({
        "metadata_cache": relay.metadata_cache().get_stats(),
        "disk_cache": relay.disk_cache().get_stats(),
    });

    let mut response = Response::new(full(Bytes::from(body.to_string())));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, text: &str) -> Response<ResponseBody> {
    let mut response = Response::new(full(Bytes::from(text.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn full(bytes: Bytes) -> ResponseBody {
    Full::new(bytes)
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_id() {
        assert_eq!(media_id("/d/AgACAgIAAx0C"), Some("AgACAgIAAx0C"));
        assert_eq!(media_id("/d/"), Some(""));
        assert_eq!(media_id("/ab12cd"), Some("ab12cd"));
        assert_eq!(media_id("/"), None);
        assert_eq!(media_id("/a/b"), None);
    }

    #[tokio::test]
    async fn test_text_response() {
        let response = text_response(StatusCode::BAD_REQUEST, "Invalid File ID");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"Invalid File ID"));
    }
}
