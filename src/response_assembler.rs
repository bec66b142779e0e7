//! Response assembler for buffered payloads

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{
    HeaderValue, ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, VARY,
};
use http::{HeaderMap, StatusCode};
use std::io::Write;
use tracing::{debug, warn};

/// A fully assembled buffered response
#[derive(Debug, Clone)]
pub struct AssembledResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AssembledResponse {
    pub fn is_compressed(&self) -> bool {
        self.headers
            .get(CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes() == b"gzip")
    }
}

/// Applies caching headers, content type and optional gzip to a payload
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    cache_max_age: u64,
    compression_threshold: usize,
}

impl ResponseAssembler {
    /// # Arguments
    /// * `cache_max_age` - value of `Cache-Control: max-age`
    /// * `compression_threshold` - payloads at or above this size are never compressed
    pub fn new(cache_max_age: u64, compression_threshold: usize) -> Self {
        ResponseAssembler {
            cache_max_age,
            compression_threshold,
        }
    }

    /// Build the response for `body`
    ///
    /// Pure function of its inputs. The body is gzip-compressed only when it
    /// is below the threshold and the request's `Accept-Encoding` admits
    /// gzip; otherwise it is passed through byte-identical. An invalid mime
    /// string falls back to `application/octet-stream`.
    pub fn assemble(&self, body: Bytes, mime: &str, request_headers: &HeaderMap) -> AssembledResponse {
        let mut headers = HeaderMap::new();

        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_str(&format!("max-age={}", self.cache_max_age))
                .unwrap_or_else(|_| HeaderValue::from_static("max-age=3600")),
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(mime)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
        );
        headers.insert(VARY, HeaderValue::from_static("Accept, Accept-Encoding"));

        let wants_gzip = request_headers
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(accepts_gzip);

        let body = if body.len() < self.compression_threshold && wants_gzip {
            match gzip(&body) {
                Ok(compressed) => {
                    debug!(
                        "Compressed response body: {} -> {} bytes",
                        body.len(),
                        compressed.len()
                    );
                    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    compressed
                }
                Err(e) => {
                    warn!("Gzip compression failed, sending uncompressed: {}", e);
                    body
                }
            }
        } else {
            body
        };

        AssembledResponse {
            status: StatusCode::OK,
            headers,
            body,
        }
    }
}

/// Whether an `Accept-Encoding` value admits gzip
///
/// An explicit `gzip` coding decides; otherwise a `*` coding does. Either
/// is refused when its quality is zero.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    let mut wildcard = None;
    for item in accept_encoding.split(',') {
        let mut parts = item.split(';').map(str::trim);
        let coding = parts.next().unwrap_or("");
        let acceptable = !parts.any(|param| {
            param
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });

        // An explicit gzip entry overrides any wildcard
        if coding.eq_ignore_ascii_case("gzip") {
            return acceptable;
        }
        if coding == "*" {
            wildcard = Some(acceptable);
        }
    }
    wildcard.unwrap_or(false)
}

fn gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 64), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}
