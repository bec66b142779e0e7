//! Prometheus metrics for the relay

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Cache tier a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Metadata,
    Disk,
}

impl CacheTier {
    fn label(self) -> &'static str {
        match self {
            CacheTier::Metadata => "metadata",
            CacheTier::Disk => "disk",
        }
    }
}

/// Where response bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSource {
    Disk,
    Origin,
    Stream,
}

impl ByteSource {
    fn label(self) -> &'static str {
        match self {
            ByteSource::Disk => "disk",
            ByteSource::Origin => "origin",
            ByteSource::Stream => "stream",
        }
    }
}

/// Relay metrics, registered on their own registry
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    requests_total: CounterVec,
    cache_lookups_total: CounterVec,
    origin_calls_total: CounterVec,
    bytes_served_total: CounterVec,
    request_duration_seconds: HistogramVec,
}

impl RelayMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = CounterVec::new(
            Opts::new("media_relay_requests_total", "Total relay requests by status"),
            &["status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let cache_lookups_total = CounterVec::new(
            Opts::new(
                "media_relay_cache_lookups_total",
                "Cache lookups by tier and result",
            ),
            &["tier", "result"], // result: hit, miss
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let origin_calls_total = CounterVec::new(
            Opts::new(
                "media_relay_origin_calls_total",
                "Origin calls by operation and result",
            ),
            &["op", "result"], // op: resolve, download, stream
        )?;
        registry.register(Box::new(origin_calls_total.clone()))?;

        let bytes_served_total = CounterVec::new(
            Opts::new(
                "media_relay_bytes_served_total",
                "Payload bytes served by source",
            ),
            &["source"],
        )?;
        registry.register(Box::new(bytes_served_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "media_relay_request_duration_seconds",
                "Time to produce a response in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["outcome"], // outcome: served, streamed, failed
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(RelayMetrics {
            registry,
            requests_total,
            cache_lookups_total,
            origin_calls_total,
            bytes_served_total,
            request_duration_seconds,
        })
    }

    pub fn record_request(&self, status: u16) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn record_cache_lookup(&self, tier: CacheTier, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[tier.label(), result])
            .inc();
    }

    pub fn record_origin_call(&self, op: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.origin_calls_total
            .with_label_values(&[op, result])
            .inc();
    }

    pub fn record_bytes(&self, source: ByteSource, bytes: usize) {
        self.bytes_served_total
            .with_label_values(&[source.label()])
            .inc_by(bytes as f64);
    }

    pub fn record_duration(&self, outcome: &str, elapsed: Duration) {
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
