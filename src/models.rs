//! Core data models for the media relay

use crate::error::{RelayError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static FILE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"));

/// Opaque token naming a remote object
///
/// Only strings matching `[A-Za-z0-9_-]+` can be turned into a `FileId`, so
/// every holder of one may use it as a path component or URL query value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Validate and wrap an untrusted identifier
    pub fn parse(raw: &str) -> Result<Self> {
        if Self::is_valid(raw) {
            Ok(FileId(raw.to_string()))
        } else {
            Err(RelayError::Validation(format!(
                "file id must match [A-Za-z0-9_-]+, got {:?}",
                raw
            )))
        }
    }

    /// Check the character-class invariant without allocating
    pub fn is_valid(raw: &str) -> bool {
        FILE_ID_PATTERN.is_match(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for FileId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self> {
        FileId::parse(&value)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origin-side path of a file, as reported by the origin lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedPath(String);

impl ResolvedPath {
    pub fn new(path: impl Into<String>) -> Self {
        ResolvedPath(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased extension of the last path segment, without the dot
    ///
    /// `photos/file_12.JPG` yields `Some("jpg")`; `videos/file_3` and
    /// `photos/file.` yield `None`.
    pub fn extension(&self) -> Option<String> {
        let segment = self.0.rsplit('/').next().unwrap_or("");
        match segment.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => Some(ext.to_ascii_lowercase()),
            _ => None,
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format-specific form of a cached object
///
/// Cache keys are `(FileId, Variant)` pairs, so the same origin object can
/// be stored once per variant a client asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant(String);

impl Variant {
    /// Placeholder variant for paths without an extension
    pub const GENERIC: &'static str = "bin";
    /// Web-optimized image variant preferred by browsers that accept it
    pub const WEBP: &'static str = "webp";

    /// Build a variant, keeping only ASCII alphanumerics
    pub fn new(name: &str) -> Self {
        let cleaned: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if cleaned.is_empty() {
            Variant(Self::GENERIC.to_string())
        } else {
            Variant(cleaned)
        }
    }

    /// Pick the variant for a request
    ///
    /// An `Accept` header listing `image/webp` selects the webp variant;
    /// otherwise the resolved path's extension is used.
    pub fn select(accept: Option<&str>, path: &ResolvedPath) -> Self {
        if accept.is_some_and(|a| a.contains("image/webp")) {
            return Variant(Self::WEBP.to_string());
        }
        match path.extension() {
            Some(ext) => Variant::new(&ext),
            None => Variant(Self::GENERIC.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
