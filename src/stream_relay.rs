//! Streaming relay for large and range-requested objects
//!
//! Origin chunks are forwarded to the client as they arrive. Between the
//! two sits a [`RelayBuffer`] with a fixed high-water mark:
//!
//! ```text
//! origin chunks ──► [ coalesce ≤ limit | split > limit ] ──► client frames
//!                        flushed when full or when origin stalls
//! ```
//!
//! The buffer never holds more than `limit` bytes, however large the
//! object is.

use crate::error::{RelayError, Result};
use crate::origin::{ByteStream, OriginStream};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::header::{
    HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use http::{HeaderMap, StatusCode};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Observed occupancy of a relay buffer
#[derive(Debug, Default)]
pub struct BufferGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    relayed: AtomicU64,
}

impl BufferGauge {
    /// Bytes currently held in the buffer
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Highest occupancy seen over the buffer's lifetime
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Total bytes handed on to the client
    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    fn set(&self, len: usize) {
        self.current.store(len, Ordering::Relaxed);
        self.peak.fetch_max(len, Ordering::Relaxed);
    }
}

/// Bounded re-chunking adapter over an origin body
pub struct RelayBuffer {
    inner: ByteStream,
    buf: BytesMut,
    pending: Option<Bytes>,
    limit: usize,
    gauge: Arc<BufferGauge>,
    exhausted: bool,
    failed: bool,
}

impl RelayBuffer {
    pub fn new(inner: ByteStream, limit: usize) -> Self {
        let limit = limit.max(1);
        RelayBuffer {
            inner,
            buf: BytesMut::with_capacity(limit),
            pending: None,
            limit,
            gauge: Arc::new(BufferGauge::default()),
            exhausted: false,
            failed: false,
        }
    }

    /// Shared handle for observing buffer occupancy while the body is consumed
    pub fn gauge(&self) -> Arc<BufferGauge> {
        self.gauge.clone()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn emit(&mut self, chunk: Bytes) -> Poll<Option<Result<Bytes>>> {
        self.gauge.relayed.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Poll::Ready(Some(Ok(chunk)))
    }

    fn flush(&mut self) -> Poll<Option<Result<Bytes>>> {
        let chunk = self.buf.split().freeze();
        self.gauge.set(0);
        self.emit(chunk)
    }

    fn append(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        self.gauge.set(self.buf.len());
    }
}

impl Stream for RelayBuffer {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if this.failed {
            return Poll::Ready(None);
        }

        loop {
            // An oversized origin chunk is handed on in limit-sized pieces
            if let Some(mut pending) = this.pending.take() {
                if pending.len() > this.limit {
                    let head = pending.split_to(this.limit);
                    this.pending = Some(pending);
                    return this.emit(head);
                }
                this.append(&pending);
            }

            if this.buf.len() >= this.limit {
                return this.flush();
            }

            if this.exhausted {
                if this.buf.is_empty() {
                    debug!("Relay finished: {} bytes", this.gauge.relayed());
                    return Poll::Ready(None);
                }
                return this.flush();
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if this.buf.len() + chunk.len() <= this.limit {
                        this.append(&chunk);
                        continue;
                    }
                    this.pending = Some(chunk);
                    if !this.buf.is_empty() {
                        return this.flush();
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    warn!(
                        "Origin stream broke after {} bytes: {}",
                        this.gauge.relayed(),
                        e
                    );
                    this.failed = true;
                    this.buf.clear();
                    this.pending = None;
                    this.gauge.set(0);
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.exhausted = true;
                }
                Poll::Pending => {
                    // Origin stalled: hand over what we have instead of holding it
                    if !this.buf.is_empty() {
                        return this.flush();
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Status, headers and body of a relayed stream
pub struct StreamedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBuffer,
}

/// Turns origin streams into client responses
#[derive(Debug, Clone)]
pub struct StreamRelay {
    buffer_limit: usize,
    cache_max_age: u64,
}

impl StreamRelay {
    pub fn new(buffer_limit: usize, cache_max_age: u64) -> Self {
        StreamRelay {
            buffer_limit,
            cache_max_age,
        }
    }

    /// Wrap an origin stream for the client
    ///
    /// The response advertises `Accept-Ranges: bytes`, passes on the
    /// origin's `Content-Length` and `Content-Range`, and keeps the origin
    /// status (200 or 206).
    pub fn relay(&self, upstream: OriginStream, mime: &str) -> Result<StreamedResponse> {
        let mut headers = HeaderMap::new();

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(mime)
                .map_err(|e| RelayError::Internal(format!("Invalid content type: {}", e)))?,
        );
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_str(&format!("max-age={}", self.cache_max_age))
                .map_err(|e| RelayError::Internal(format!("Invalid cache control: {}", e)))?,
        );

        if let Some(length) = upstream.content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        if let Some(range) = &upstream.content_range {
            headers.insert(
                CONTENT_RANGE,
                HeaderValue::from_str(range)
                    .map_err(|e| RelayError::Internal(format!("Invalid content range: {}", e)))?,
            );
        }

        debug!(
            "Relaying stream: status={}, content_length={:?}, content_range={:?}",
            upstream.status, upstream.content_length, upstream.content_range
        );

        Ok(StreamedResponse {
            status: upstream.status,
            headers,
            body: RelayBuffer::new(upstream.body, self.buffer_limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(chunks: Vec<Result<Bytes>>) -> ByteStream {
        stream::iter(chunks).boxed()
    }

    async fn drain(buffer: RelayBuffer) -> Vec<Result<Bytes>> {
        buffer.collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn test_coalesces_small_chunks() {
        let chunks = (0..10).map(|i| Ok(Bytes::from(vec![i as u8; 10]))).collect();
        let buffer = RelayBuffer::new(source(chunks), 25);
        let gauge = buffer.gauge();

        let out: Vec<Bytes> = drain(buffer).await.into_iter().map(|r| r.unwrap()).collect();

        assert!(out.iter().all(|c| c.len() <= 25));
        assert_eq!(out.iter().map(|c| c.len()).sum::<usize>(), 100);
        assert!(gauge.peak() <= 25);
        assert_eq!(gauge.relayed(), 100);
        assert_eq!(gauge.current(), 0);
    }

    #[tokio::test]
    async fn test_splits_oversized_chunks() {
        let big = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let buffer = RelayBuffer::new(source(vec![Ok(big.clone())]), 64);
        let gauge = buffer.gauge();

        let out: Vec<Bytes> = drain(buffer).await.into_iter().map(|r| r.unwrap()).collect();

        assert!(out.iter().all(|c| c.len() <= 64));
        let joined: Vec<u8> = out.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, big.to_vec());
        assert!(gauge.peak() <= 64);
    }

    #[tokio::test]
    async fn test_preserves_order_across_mixed_sizes() {
        let chunks = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cdefghijkl")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"m")),
        ];
        let out: Vec<Bytes> = drain(RelayBuffer::new(source(chunks), 4))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let joined: Vec<u8> = out.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, b"abcdefghijklm");
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(RelayError::RelayFailed("reset".to_string())),
            Ok(Bytes::from_static(b"never")),
        ];
        let out = drain(RelayBuffer::new(source(chunks), 1024)).await;

        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(RelayError::RelayFailed(_))));
    }

    #[test]
    fn test_relay_headers() {
        let relay = StreamRelay::new(1024, 3600);
        let upstream = OriginStream {
            status: StatusCode::PARTIAL_CONTENT,
            content_length: Some(1000),
            content_range: Some("bytes 0-999/5000".to_string()),
            body: source(vec![]),
        };

        let response = relay.relay(upstream, "video/mp4").unwrap();
        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers[ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers[CONTENT_LENGTH], "1000");
        assert_eq!(response.headers[CONTENT_RANGE], "bytes 0-999/5000");
        assert_eq!(response.headers[CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers[CACHE_CONTROL], "max-age=3600");
    }
}
