//! Configuration management for the media relay

use crate::error::{RelayError, Result};
use crate::metadata_cache::MAX_TTL;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `bot_token`
pub const BOT_TOKEN_ENV: &str = "MEDIA_RELAY_BOT_TOKEN";

/// Configuration for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the HTTP server binds to (default: 127.0.0.1:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Base URL of the origin bot API (default: https://api.telegram.org)
    #[serde(default = "default_origin_base_url")]
    pub origin_base_url: String,

    /// Access token embedded in origin URLs
    #[serde(default)]
    pub bot_token: String,

    /// Metadata cache TTL in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl: u64,

    /// Maximum number of metadata cache entries (default: 100000)
    #[serde(default = "default_metadata_max_entries")]
    pub metadata_cache_max_entries: usize,

    /// Disk cache directory (default: /var/cache/media-relay)
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// `max-age` advertised in Cache-Control (default: 3600)
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age: u64,

    /// Payloads strictly below this size may be gzip-compressed (default: 1MB)
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// High-water mark of the streaming relay buffer (default: 100KB)
    #[serde(default = "default_stream_buffer_limit")]
    pub stream_buffer_limit: usize,

    /// Mime type prefixes that are relayed as streams (default: ["video/"])
    #[serde(default = "default_stream_mime_prefixes")]
    pub stream_mime_prefixes: Vec<String>,

    /// Path parameters up to this length are treated as short aliases (default: 6)
    #[serde(default = "default_short_id_max_len")]
    pub short_id_max_len: usize,

    /// Origin connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Origin overall request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Extra extension to mime type mappings, merged over the built-in table
    #[serde(default)]
    pub mime_types: HashMap<String, String>,

    /// Mime type used when nothing else matches
    #[serde(default = "default_mime_type")]
    pub default_mime_type: String,

    /// Optional JSON file mapping short aliases to full identifiers
    #[serde(default)]
    pub aliases_file: Option<String>,

    /// Interval between expired metadata sweeps in seconds (default: 300)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

// Default value functions for serde
fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_origin_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_metadata_ttl() -> u64 {
    3600 // 1 hour
}

fn default_metadata_max_entries() -> usize {
    100_000
}

fn default_cache_dir() -> String {
    "/var/cache/media-relay".to_string()
}

fn default_cache_max_age() -> u64 {
    3600
}

fn default_compression_threshold() -> usize {
    1024 * 1024 // 1MB
}

fn default_stream_buffer_limit() -> usize {
    100 * 1024 // 100KB
}

fn default_stream_mime_prefixes() -> Vec<String> {
    vec!["video/".to_string()]
}

fn default_short_id_max_len() -> usize {
    6
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_address: default_listen_address(),
            origin_base_url: default_origin_base_url(),
            bot_token: String::new(),
            metadata_ttl: default_metadata_ttl(),
            metadata_cache_max_entries: default_metadata_max_entries(),
            cache_dir: default_cache_dir(),
            cache_max_age: default_cache_max_age(),
            compression_threshold: default_compression_threshold(),
            stream_buffer_limit: default_stream_buffer_limit(),
            stream_mime_prefixes: default_stream_mime_prefixes(),
            short_id_max_len: default_short_id_max_len(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            mime_types: HashMap::new(),
            default_mime_type: default_mime_type(),
            aliases_file: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(RelayConfig)` if loading and validation succeed
    /// * `Err(RelayError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML file, letting the
    /// `MEDIA_RELAY_BOT_TOKEN` environment variable replace `bot_token`
    ///
    /// Validation runs after the override, so the file itself may omit the token.
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config = Self::parse(&content)?;
        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.bot_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - origin_base_url must be an http(s) URL and bot_token non-empty
    /// - listen_address must parse as a socket address
    /// - metadata_ttl, compression_threshold, stream_buffer_limit,
    ///   metadata_cache_max_entries and both timeouts must be > 0
    /// - connect timeout must not exceed the overall timeout
    pub fn validate(&self) -> Result<()> {
        if !(self.origin_base_url.starts_with("http://")
            || self.origin_base_url.starts_with("https://"))
        {
            return Err(RelayError::Config(format!(
                "origin_base_url must start with http:// or https://, got '{}'",
                self.origin_base_url
            )));
        }

        if self.bot_token.trim().is_empty() {
            return Err(RelayError::Config(
                "bot_token must not be empty".to_string(),
            ));
        }

        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            RelayError::Config(format!(
                "listen_address '{}' is not a socket address: {}",
                self.listen_address, e
            ))
        })?;

        if self.metadata_ttl == 0 {
            return Err(RelayError::Config(
                "metadata_ttl must be greater than 0".to_string(),
            ));
        }

        if self.metadata_ttl > MAX_TTL.as_secs() {
            return Err(RelayError::Config(format!(
                "metadata_ttl must not exceed {} seconds, got {}",
                MAX_TTL.as_secs(),
                self.metadata_ttl
            )));
        }

        if self.metadata_cache_max_entries == 0 {
            return Err(RelayError::Config(
                "metadata_cache_max_entries must be greater than 0".to_string(),
            ));
        }

        if self.compression_threshold == 0 {
            return Err(RelayError::Config(
                "compression_threshold must be greater than 0".to_string(),
            ));
        }

        if self.stream_buffer_limit == 0 {
            return Err(RelayError::Config(
                "stream_buffer_limit must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(RelayError::Config(
                "origin timeouts must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_secs > self.request_timeout_secs {
            return Err(RelayError::Config(format!(
                "connect_timeout_secs ({}) must not exceed request_timeout_secs ({})",
                self.connect_timeout_secs, self.request_timeout_secs
            )));
        }

        Ok(())
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Whether objects of this mime type go through the streaming relay
    pub fn is_stream_mime(&self, mime: &str) -> bool {
        self.stream_mime_prefixes
            .iter()
            .any(|prefix| mime.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RelayConfig {
        RelayConfig {
            bot_token: "123:abc".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.metadata_ttl, 3600);
        assert_eq!(config.cache_max_age, 3600);
        assert_eq!(config.compression_threshold, 1024 * 1024);
        assert_eq!(config.stream_buffer_limit, 100 * 1024);
        assert_eq!(config.short_id_max_len, 6);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_token() {
        let config = RelayConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = valid_config();
        config.origin_base_url = "api.telegram.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_listen_address() {
        let mut config = valid_config();
        config.listen_address = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = valid_config();
        config.metadata_ttl = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_buffer_limit() {
        let mut config = valid_config();
        config.stream_buffer_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_timeouts() {
        let mut config = valid_config();
        config.connect_timeout_secs = 60;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = RelayConfig::from_yaml(
            "bot_token: \"123:abc\"\nmetadata_ttl: 60\nmime_types:\n  heic: image/heic\n",
        )
        .unwrap();
        assert_eq!(config.metadata_ttl, 60);
        assert_eq!(config.cache_max_age, 3600);
        assert_eq!(config.mime_types.get("heic").map(String::as_str), Some("image/heic"));
    }

    #[test]
    fn test_is_stream_mime() {
        let config = valid_config();
        assert!(config.is_stream_mime("video/mp4"));
        assert!(!config.is_stream_mime("image/jpeg"));
    }
}
