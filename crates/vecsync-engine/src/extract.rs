//! Content extractors selected by file extension.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::ExtractionError;

/// Upper bound on the size of a file handed to an extractor.
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Turns a file of one family of formats into plain text.
pub trait ContentExtractor: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    /// Lowercase extensions (without the dot) this extractor handles.
    fn extensions(&self) -> Vec<String>;

    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Extracts text files, decoding UTF-8 and falling back to Latin-1.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    extensions: Vec<String>,
    max_bytes: u64,
}

impl PlainTextExtractor {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_bytes: MAX_FILE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Decode bytes as UTF-8 (BOM stripped), or as Latin-1 when that fails.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

impl ContentExtractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "plain-text"
    }

    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let metadata = std::fs::metadata(path).map_err(|e| ExtractionError::from_io(path, e))?;
        if metadata.len() > self.max_bytes {
            return Err(ExtractionError::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit: self.max_bytes,
            });
        }
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::from_io(path, e))?;
        // NUL never appears in text; this is binary data under a text extension
        if let Some(at) = bytes.iter().position(|&b| b == 0) {
            return Err(ExtractionError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("NUL byte at offset {}", at),
            });
        }
        Ok(decode_text(&bytes))
    }
}

/// Lowercase extension of a path, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Maps extensions to extractors.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plain-text extractor for the given extensions.
    pub fn with_plain_text(extensions: Vec<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextExtractor::new(extensions)));
        registry
    }

    /// Register an extractor. Later registrations win for shared extensions.
    pub fn register(&mut self, extractor: Arc<dyn ContentExtractor>) {
        for ext in extractor.extensions() {
            debug!(extension = %ext, extractor = extractor.name(), "Registered extractor");
            self.by_extension.insert(ext, extractor.clone());
        }
    }

    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn ContentExtractor>> {
        extension_of(path).and_then(|ext| self.by_extension.get(&ext))
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    pub fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let extractor = self
            .for_path(path)
            .ok_or_else(|| ExtractionError::Unsupported(path.to_path_buf()))?;
        extractor.extract(path)
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut exts: Vec<&String> = self.by_extension.keys().collect();
        exts.sort();
        f.debug_struct("ExtractorRegistry")
            .field("extensions", &exts)
            .finish()
    }
}
