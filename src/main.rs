//! Media Relay Server
//!
//! Loads configuration, sets up logging, wires the caches and the origin
//! client together and serves HTTP until interrupted.

use anyhow::{Context, Result};
use media_relay::{
    AliasStore, BotApiOrigin, DiskCache, MemoryAliasStore, MetadataCache, Relay, RelayConfig,
    RelayMetrics, RelayServer,
};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

/// # Usage
/// ```bash
/// # Start with default config (media_relay.yaml)
/// media-relay
///
/// # Start with custom config
/// media-relay /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Media Relay Server");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "media_relay.yaml".to_string());

    info!("Loading configuration from: {}", config_path);

    let config = RelayConfig::from_file_with_env(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Origin: {}", config.origin_base_url);
    info!("  - Cache directory: {}", config.cache_dir);
    info!("  - Metadata TTL: {} seconds", config.metadata_ttl);
    info!(
        "  - Compression threshold: {} KB",
        config.compression_threshold / 1024
    );
    info!(
        "  - Stream buffer limit: {} KB",
        config.stream_buffer_limit / 1024
    );
    info!("  - Stream mime prefixes: {:?}", config.stream_mime_prefixes);

    let config = Arc::new(config);

    let aliases = match &config.aliases_file {
        Some(path) => MemoryAliasStore::from_json_file(path)
            .with_context(|| format!("failed to load aliases from {}", path))?,
        None => {
            warn!("No aliases file configured; short ids will not resolve");
            MemoryAliasStore::new()
        }
    };
    let aliases: Arc<dyn AliasStore> = Arc::new(aliases);

    let disk = DiskCache::new(&config.cache_dir)
        .await
        .context("failed to open disk cache")?;
    let origin = BotApiOrigin::new(&config).context("failed to create origin client")?;
    let metrics = RelayMetrics::new().context("failed to register metrics")?;

    let relay = Relay::new(
        config.clone(),
        Arc::new(MetadataCache::new(config.metadata_cache_max_entries)),
        Arc::new(disk),
        Arc::new(origin),
        aliases,
        metrics,
    );

    RelayServer::new(Arc::new(relay))
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("server failed")?;

    info!("Media Relay Server stopped");
    Ok(())
}
