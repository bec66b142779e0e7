//! Mime type resolution for origin paths

use crate::models::ResolvedPath;
use std::collections::HashMap;

const BUILTIN_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("heic", "image/heic"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("wav", "audio/wav"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("tgs", "application/x-tgsticker"),
];

/// Maps origin paths to content types
///
/// Never fails: when neither the extension table nor the path heuristics
/// match, the configured default type is returned.
#[derive(Debug, Clone)]
pub struct MimeResolver {
    table: HashMap<String, String>,
    default_type: String,
}

impl MimeResolver {
    /// Build a resolver from the built-in table with `overrides` merged on top
    pub fn new(overrides: &HashMap<String, String>, default_type: impl Into<String>) -> Self {
        let mut table: HashMap<String, String> = BUILTIN_TYPES
            .iter()
            .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
            .collect();
        for (ext, mime) in overrides {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            table.insert(ext, mime.clone());
        }

        MimeResolver {
            table,
            default_type: default_type.into(),
        }
    }

    pub fn resolve(&self, path: &ResolvedPath) -> &str {
        let extension = path.extension();

        if matches!(extension.as_deref(), None | Some("bin")) {
            let raw = path.as_str();
            if raw.contains("photo") {
                return "image/jpeg";
            }
            if raw.contains("video") {
                return "video/mp4";
            }
        }

        extension
            .and_then(|ext| self.table.get(&ext))
            .map(String::as_str)
            .unwrap_or(&self.default_type)
    }
}

impl Default for MimeResolver {
    fn default() -> Self {
        Self::new(&HashMap::new(), "application/octet-stream")
    }
}
