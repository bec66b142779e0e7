//! Origin client: identifier lookup, whole-object download and range streaming
//!
//! The origin speaks the bot-API layout:
//! - lookup:   `{base}/bot{token}/getFile?file_id={id}`
//! - download: `{base}/file/bot{token}/{path}`

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::models::{FileId, ResolvedPath};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Body of an origin response, yielded chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An origin response being relayed without buffering
pub struct OriginStream {
    /// 200 for a full object, 206 when the origin honoured a Range
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for OriginStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginStream")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Operations the relay needs from the origin
#[async_trait]
pub trait Origin: Send + Sync {
    /// Resolve an identifier to its origin path
    ///
    /// Fails with `NotFound` when the origin does not know the identifier
    /// and with `OriginUnavailable` when it cannot be asked.
    async fn resolve(&self, id: &FileId) -> Result<ResolvedPath>;

    /// Download a whole object; an empty payload is `OriginUnavailable`
    async fn download(&self, path: &ResolvedPath) -> Result<Bytes>;

    /// Open a streaming GET, forwarding `range` verbatim when present
    async fn stream(&self, path: &ResolvedPath, range: Option<&str>) -> Result<OriginStream>;
}

#[derive(Debug, Deserialize)]
struct GetFileResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Option<GetFileResult>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetFileResult {
    #[serde(default)]
    file_path: Option<String>,
}

/// reqwest-backed client for a bot-API origin
pub struct BotApiOrigin {
    client: Client,
    base_url: String,
    token: String,
}

impl BotApiOrigin {
    /// Create a client with the configured connect and overall timeouts
    pub fn new(config: &RelayConfig) -> Result<Self> {
        Self::with_timeouts(
            &config.origin_base_url,
            &config.bot_token,
            config.connect_timeout(),
            config.request_timeout(),
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        token: &str,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(BotApiOrigin {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn lookup_url(&self, id: &FileId) -> String {
        format!("{}/bot{}/getFile?file_id={}", self.base_url, self.token, id)
    }

    fn download_url(&self, path: &ResolvedPath) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.base_url,
            self.token,
            path.as_str().trim_start_matches('/')
        )
    }

    fn transport_error(context: &str, err: reqwest::Error) -> RelayError {
        // reqwest errors embed the URL, which embeds the token
        let err = err.without_url();
        if err.is_timeout() {
            RelayError::OriginUnavailable(format!("{}: timed out: {}", context, err))
        } else {
            RelayError::OriginUnavailable(format!("{}: {}", context, err))
        }
    }
}

#[async_trait]
impl Origin for BotApiOrigin {
    async fn resolve(&self, id: &FileId) -> Result<ResolvedPath> {
        debug!("Resolving file id={} against origin", id);

        let response = self
            .client
            .get(self.lookup_url(id))
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                warn!("Origin lookup failed for id={}: {}", id, e);
                Self::transport_error("lookup request failed", e)
            })?;

        let status = response.status();

        // The bot API reports unknown ids as 400 "Bad Request: invalid file_id"
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            warn!("Origin does not know id={}: status={}", id, status);
            return Err(RelayError::NotFound(format!("origin returned {} for {}", status, id)));
        }

        if !status.is_success() {
            warn!("Origin lookup for id={} returned status={}", id, status);
            return Err(RelayError::OriginUnavailable(format!(
                "lookup returned status {}",
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error("lookup body read failed", e))?;

        if body.is_empty() {
            return Err(RelayError::OriginUnavailable(
                "lookup returned an empty body".to_string(),
            ));
        }

        let parsed: GetFileResponse = serde_json::from_slice(&body).map_err(|e| {
            RelayError::OriginUnavailable(format!("lookup returned malformed JSON: {}", e))
        })?;

        match parsed.result.and_then(|r| r.file_path) {
            Some(file_path) if parsed.ok && !file_path.is_empty() => {
                info!("Resolved id={} to path={}", id, file_path);
                Ok(ResolvedPath::new(file_path))
            }
            _ => {
                warn!(
                    "Origin has no file path for id={}: {}",
                    id,
                    parsed.description.as_deref().unwrap_or("no description")
                );
                Err(RelayError::NotFound(format!("no file path for {}", id)))
            }
        }
    }

    async fn download(&self, path: &ResolvedPath) -> Result<Bytes> {
        debug!("Downloading path={} from origin", path);

        let response = self
            .client
            .get(self.download_url(path))
            .send()
            .await
            .map_err(|e| Self::transport_error("download request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Origin download for path={} returned status={}", path, status);
            return Err(RelayError::OriginUnavailable(format!(
                "download returned status {}",
                status
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error("download body read failed", e))?;

        if data.is_empty() {
            warn!("Origin returned an empty payload for path={}", path);
            return Err(RelayError::OriginUnavailable(format!(
                "empty payload for {}",
                path
            )));
        }

        debug!("Downloaded path={} ({} bytes)", path, data.len());
        Ok(data)
    }

    async fn stream(&self, path: &ResolvedPath, range: Option<&str>) -> Result<OriginStream> {
        let mut request = self.client.get(self.download_url(path));
        if let Some(range) = range {
            debug!("Forwarding Range '{}' for path={}", range, path);
            request = request.header(http::header::RANGE, range);
        }

        let response = request.send().await.map_err(|e| {
            let e = e.without_url();
            warn!("Origin stream failed for path={}: {}", path, e);
            RelayError::RelayFailed(format!("stream request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Origin stream for path={} returned status={}", path, status);
            return Err(RelayError::from_stream_status(
                status.as_u16(),
                format!("stream of {}", path),
            ));
        }

        let content_range = response
            .headers()
            .get(http::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let content_length = response.content_length();

        let body = response
            .bytes_stream()
            .map_err(|e| RelayError::RelayFailed(format!("origin body error: {}", e.without_url())))
            .boxed();

        Ok(OriginStream {
            status,
            content_length,
            content_range,
            body,
        })
    }
}
