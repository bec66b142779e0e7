//! Per-request orchestration
//!
//! Every request walks an explicit state machine until it reaches a
//! terminal [`RelayOutcome`]:
//!
//! ```text
//! ResolveIdentifier ─► CheckMetadataCache ─┬─ hit ──────────────► Route
//!                                          └─ miss ─► OriginResolve ─┘
//! Route ─┬─ Range / stream mime ─► Stream ─► Done
//!        └─ CheckDiskCache ─┬─ hit ─► Serve ─► Done
//!                           └─ miss ─► OriginDownload ─► PersistAsync ─► Serve
//! ```

use crate::alias::AliasStore;
use crate::config::RelayConfig;
use crate::disk_cache::DiskCache;
use crate::error::{RelayError, Result};
use crate::metadata_cache::MetadataCache;
use crate::metrics::{ByteSource, CacheTier, RelayMetrics};
use crate::mime::MimeResolver;
use crate::models::{FileId, ResolvedPath, Variant};
use crate::origin::Origin;
use crate::response_assembler::ResponseAssembler;
use crate::stream_relay::{RelayBuffer, StreamRelay};
use bytes::Bytes;
use http::header::{ACCEPT, RANGE};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// An inbound relay request
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Path parameter as received: a full identifier or a short alias
    pub raw_id: String,
    pub headers: HeaderMap,
}

impl RelayRequest {
    pub fn new(raw_id: impl Into<String>, headers: HeaderMap) -> Self {
        RelayRequest {
            raw_id: raw_id.into(),
            headers,
        }
    }

    fn header(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Body of a served response
pub enum RelayBody {
    Buffered(Bytes),
    Stream(RelayBuffer),
}

impl std::fmt::Debug for RelayBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            RelayBody::Stream(buffer) => write!(f, "Stream(limit={})", buffer.limit()),
        }
    }
}

/// Terminal result of a relay request
#[derive(Debug)]
pub enum RelayOutcome {
    Served {
        status: StatusCode,
        headers: HeaderMap,
        body: RelayBody,
    },
    Failed {
        status: StatusCode,
        reason: String,
    },
}

impl RelayOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayOutcome::Served { status, .. } | RelayOutcome::Failed { status, .. } => *status,
        }
    }

    fn failed(err: &RelayError) -> Self {
        RelayOutcome::Failed {
            status: StatusCode::from_u16(err.to_http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            reason: err.client_message().to_string(),
        }
    }
}

enum RelayState {
    ResolveIdentifier,
    CheckMetadataCache {
        id: FileId,
    },
    OriginResolve {
        id: FileId,
    },
    Route {
        id: FileId,
        path: ResolvedPath,
    },
    Stream {
        id: FileId,
        path: ResolvedPath,
        mime: String,
    },
    CheckDiskCache {
        id: FileId,
        path: ResolvedPath,
        mime: String,
    },
    OriginDownload {
        id: FileId,
        path: ResolvedPath,
        variant: Variant,
        mime: String,
    },
    PersistAsync {
        id: FileId,
        variant: Variant,
        mime: String,
        data: Bytes,
    },
    Serve {
        data: Bytes,
        mime: String,
        source: ByteSource,
    },
    Done(RelayOutcome),
}

impl RelayState {
    fn name(&self) -> &'static str {
        match self {
            RelayState::ResolveIdentifier => "resolve_identifier",
            RelayState::CheckMetadataCache { .. } => "check_metadata_cache",
            RelayState::OriginResolve { .. } => "origin_resolve",
            RelayState::Route { .. } => "route",
            RelayState::Stream { .. } => "stream",
            RelayState::CheckDiskCache { .. } => "check_disk_cache",
            RelayState::OriginDownload { .. } => "origin_download",
            RelayState::PersistAsync { .. } => "persist_async",
            RelayState::Serve { .. } => "serve",
            RelayState::Done(_) => "done",
        }
    }
}

/// Ties the caches, the origin and the response builders together
pub struct Relay {
    config: Arc<RelayConfig>,
    metadata: Arc<MetadataCache>,
    disk: Arc<DiskCache>,
    origin: Arc<dyn Origin>,
    aliases: Arc<dyn AliasStore>,
    mime: MimeResolver,
    assembler: ResponseAssembler,
    streamer: StreamRelay,
    metrics: RelayMetrics,
}

impl Relay {
    pub fn new(
        config: Arc<RelayConfig>,
        metadata: Arc<MetadataCache>,
        disk: Arc<DiskCache>,
        origin: Arc<dyn Origin>,
        aliases: Arc<dyn AliasStore>,
        metrics: RelayMetrics,
    ) -> Self {
        let mime = MimeResolver::new(&config.mime_types, config.default_mime_type.clone());
        let assembler = ResponseAssembler::new(config.cache_max_age, config.compression_threshold);
        let streamer = StreamRelay::new(config.stream_buffer_limit, config.cache_max_age);

        Relay {
            config,
            metadata,
            disk,
            origin,
            aliases,
            mime,
            assembler,
            streamer,
            metrics,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    pub fn disk_cache(&self) -> &Arc<DiskCache> {
        &self.disk
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Run a request to completion
    pub async fn handle(&self, request: RelayRequest) -> RelayOutcome {
        let started = Instant::now();
        let mut state = RelayState::ResolveIdentifier;

        let outcome = loop {
            state = match state {
                RelayState::Done(outcome) => break outcome,
                current => {
                    let name = current.name();
                    match self.step(current, &request).await {
                        Ok(next) => next,
                        Err(e) => {
                            warn!(
                                "Request for '{}' failed in {}: {}",
                                request.raw_id, name, e
                            );
                            RelayState::Done(RelayOutcome::failed(&e))
                        }
                    }
                }
            };
        };

        let status = outcome.status();
        self.metrics.record_request(status.as_u16());
        let label = match &outcome {
            RelayOutcome::Served {
                body: RelayBody::Stream(_),
                ..
            } => "streamed",
            RelayOutcome::Served { .. } => "served",
            RelayOutcome::Failed { .. } => "failed",
        };
        self.metrics.record_duration(label, started.elapsed());

        info!(
            "{} '{}' -> {} in {:?}",
            label,
            request.raw_id,
            status.as_u16(),
            started.elapsed()
        );
        outcome
    }

    async fn step(&self, state: RelayState, request: &RelayRequest) -> Result<RelayState> {
        match state {
            RelayState::ResolveIdentifier => {
                let id = self.resolve_identifier(&request.raw_id).await?;
                Ok(RelayState::CheckMetadataCache { id })
            }

            RelayState::CheckMetadataCache { id } => match self.metadata.lookup(&id) {
                Some(path) => {
                    self.metrics.record_cache_lookup(CacheTier::Metadata, true);
                    Ok(RelayState::Route { id, path })
                }
                None => {
                    self.metrics.record_cache_lookup(CacheTier::Metadata, false);
                    Ok(RelayState::OriginResolve { id })
                }
            },

            RelayState::OriginResolve { id } => {
                let resolved = self.origin.resolve(&id).await;
                self.metrics.record_origin_call("resolve", resolved.is_ok());
                let path = resolved?;
                self.metadata
                    .insert(id.clone(), path.clone(), self.config.metadata_ttl());
                Ok(RelayState::Route { id, path })
            }

            RelayState::Route { id, path } => {
                let mime = self.mime.resolve(&path).to_string();
                let ranged = request.headers.contains_key(RANGE);
                if ranged || self.config.is_stream_mime(&mime) {
                    debug!(
                        "Routing {} to stream relay (range={}, mime={})",
                        id, ranged, mime
                    );
                    Ok(RelayState::Stream { id, path, mime })
                } else {
                    Ok(RelayState::CheckDiskCache { id, path, mime })
                }
            }

            RelayState::Stream { id, path, mime } => {
                let range = request.header(RANGE);
                let upstream = self.origin.stream(&path, range).await;
                self.metrics.record_origin_call("stream", upstream.is_ok());
                let upstream = upstream?;

                if let Some(length) = upstream.content_length {
                    self.metrics.record_bytes(ByteSource::Stream, length as usize);
                }

                let response = self.streamer.relay(upstream, &mime)?;
                debug!("Streaming {} ({}) with status {}", id, path, response.status);
                Ok(RelayState::Done(RelayOutcome::Served {
                    status: response.status,
                    headers: response.headers,
                    body: RelayBody::Stream(response.body),
                }))
            }

            RelayState::CheckDiskCache { id, path, mime } => {
                let variant = Variant::select(request.header(ACCEPT), &path);
                match self.disk.get(&id, &variant).await {
                    Ok(Some(data)) => {
                        self.metrics.record_cache_lookup(CacheTier::Disk, true);
                        debug!("Disk cache hit for {}.{}", id, variant);
                        Ok(RelayState::Serve {
                            data,
                            mime,
                            source: ByteSource::Disk,
                        })
                    }
                    Ok(None) => {
                        self.metrics.record_cache_lookup(CacheTier::Disk, false);
                        Ok(RelayState::OriginDownload {
                            id,
                            path,
                            variant,
                            mime,
                        })
                    }
                    Err(e) => {
                        error!("Disk cache read failed for {}.{}: {}", id, variant, e);
                        self.metrics.record_cache_lookup(CacheTier::Disk, false);
                        Ok(RelayState::OriginDownload {
                            id,
                            path,
                            variant,
                            mime,
                        })
                    }
                }
            }

            RelayState::OriginDownload {
                id,
                path,
                variant,
                mime,
            } => {
                let downloaded = self.origin.download(&path).await;
                self.metrics.record_origin_call("download", downloaded.is_ok());
                let data = downloaded?;
                Ok(RelayState::PersistAsync {
                    id,
                    variant,
                    mime,
                    data,
                })
            }

            RelayState::PersistAsync {
                id,
                variant,
                mime,
                data,
            } => {
                self.disk.store(id, variant, data.clone());
                Ok(RelayState::Serve {
                    data,
                    mime,
                    source: ByteSource::Origin,
                })
            }

            RelayState::Serve { data, mime, source } => {
                self.metrics.record_bytes(source, data.len());
                let response = self.assembler.assemble(data, &mime, &request.headers);
                Ok(RelayState::Done(RelayOutcome::Served {
                    status: response.status,
                    headers: response.headers,
                    body: RelayBody::Buffered(response.body),
                }))
            }

            RelayState::Done(outcome) => Ok(RelayState::Done(outcome)),
        }
    }

    /// Map the path parameter to a validated identifier
    ///
    /// The raw parameter is validated before anything else is touched. Long
    /// parameters are identifiers; short ones go through the alias store.
    async fn resolve_identifier(&self, raw: &str) -> Result<FileId> {
        let parsed = FileId::parse(raw)?;

        if parsed.len() > self.config.short_id_max_len {
            return Ok(parsed);
        }

        match self.aliases.lookup_full_identifier(parsed.as_str()).await {
            Some(id) => {
                debug!("Alias {} -> {}", parsed, id);
                Ok(id)
            }
            None => Err(RelayError::NotFound(format!("unknown alias {}", parsed))),
        }
    }
}
