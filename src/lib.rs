//! Media Relay
//!
//! A caching relay for media objects (images, video) held by a remote bot-API
//! origin. Objects are addressed by an opaque file identifier or a short
//! alias, fetched from the origin on first access and served from local cache
//! afterwards.
//!
//! # Overview
//!
//! Each request goes through two cache tiers before touching the origin:
//!
//! 1. [`MetadataCache`]: a short-lived in-memory map from identifier to the
//!    origin-side path, so repeated requests skip the origin lookup
//! 2. [`DiskCache`]: durable object bytes keyed by identifier and variant
//!
//! Video and Range requests bypass the disk tier and are relayed chunk by
//! chunk through a bounded buffer ([`RelayBuffer`]) so that no object is ever
//! held in memory whole.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use media_relay::{
//!     BotApiOrigin, DiskCache, MemoryAliasStore, MetadataCache, Relay, RelayConfig,
//!     RelayMetrics, RelayServer,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(RelayConfig::from_file("media_relay.yaml")?);
//!
//! let relay = Relay::new(
//!     config.clone(),
//!     Arc::new(MetadataCache::new(config.metadata_cache_max_entries)),
//!     Arc::new(DiskCache::new(&config.cache_dir).await?),
//!     Arc::new(BotApiOrigin::new(&config)?),
//!     Arc::new(MemoryAliasStore::new()),
//!     RelayMetrics::new()?,
//! );
//!
//! RelayServer::new(Arc::new(relay))
//!     .run(async { tokio::signal::ctrl_c().await.unwrap_or(()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! origin_base_url: "https://api.telegram.org"
//! bot_token: "123456:ABC"
//! metadata_ttl: 3600               # 1 hour
//! cache_dir: "/var/cache/media-relay"
//! compression_threshold: 1048576   # 1MB
//! stream_buffer_limit: 102400      # 100KB
//! ```
//!
//! See [`RelayConfig`] for every option.

pub mod alias;
pub mod config;
pub mod disk_cache;
pub mod error;
pub mod metadata_cache;
pub mod metrics;
pub mod mime;
pub mod models;
pub mod origin;
pub mod relay;
pub mod response_assembler;
pub mod server;
pub mod stream_relay;

// Re-export commonly used types
pub use alias::{AliasStore, MemoryAliasStore};
pub use config::RelayConfig;
pub use disk_cache::{DiskCache, DiskCacheStats};
pub use error::{RelayError, Result};
pub use metadata_cache::{MetadataCache, MetadataCacheStats};
pub use metrics::RelayMetrics;
pub use mime::MimeResolver;
pub use models::{FileId, ResolvedPath, Variant};
pub use origin::{BotApiOrigin, ByteStream, Origin, OriginStream};
pub use relay::{Relay, RelayBody, RelayOutcome, RelayRequest};
pub use response_assembler::{AssembledResponse, ResponseAssembler};
pub use server::RelayServer;
pub use stream_relay::{BufferGauge, RelayBuffer, StreamRelay, StreamedResponse};
