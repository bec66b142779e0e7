//! Short alias → full file identifier lookup

use crate::error::{RelayError, Result};
use crate::models::FileId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

/// Store mapping short aliases to full identifiers
#[async_trait]
pub trait AliasStore: Send + Sync {
    /// `None` means the alias is unknown
    async fn lookup_full_identifier(&self, short_id: &str) -> Option<FileId>;
}

/// In-memory alias store
#[derive(Default)]
pub struct MemoryAliasStore {
    aliases: RwLock<HashMap<String, FileId>>,
}

impl MemoryAliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `{"short": "full_identifier"}` JSON object
    ///
    /// Every value must be a valid identifier.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read aliases file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let aliases: HashMap<String, FileId> = serde_json::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse aliases file: {}", e)))?;

        info!("Loaded {} aliases from {}", aliases.len(), path.as_ref().display());

        Ok(MemoryAliasStore {
            aliases: RwLock::new(aliases),
        })
    }

    pub fn insert(&self, short_id: impl Into<String>, id: FileId) {
        self.aliases
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(short_id.into(), id);
    }

    pub fn len(&self) -> usize {
        self.aliases.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AliasStore for MemoryAliasStore {
    async fn lookup_full_identifier(&self, short_id: &str) -> Option<FileId> {
        let found = self
            .aliases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(short_id)
            .cloned();
        debug!("Alias lookup {} -> {:?}", short_id, found);
        found
    }
}
