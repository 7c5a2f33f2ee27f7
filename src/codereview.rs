//! Code-review hashing
//!
//! A code-review hash is a digest over the parts of a source file that matter
//! to a reviewer. When it is recorded next to the content hash, verification
//! can tell a cosmetic edit (reason 4) from a substantive one (reason 5).
//!
//! The digest function is pluggable through [`CodeReviewer`]. The built-in
//! [`SourceReviewer`] ignores all ASCII whitespace in files with a known
//! source extension.

use std::fs;
use std::path::Path;
use tracing::trace;

/// External code-review hash function
pub trait CodeReviewer: Send + Sync {
    /// Hex encoded 256-bit digest for `path`, or `None` if the file is not
    /// reviewable or cannot be read
    fn review(&self, path: &Path) -> Option<String>;
}

/// Source file extensions reviewed by default
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "go", "h", "hpp", "java", "js", "lua", "pl", "py", "rs", "sh", "ts", "zig",
];

/// Whitespace-insensitive reviewer for source files
#[derive(Debug, Clone)]
pub struct SourceReviewer {
    extensions: Vec<String>,
}

impl Default for SourceReviewer {
    fn default() -> Self {
        Self {
            extensions: SOURCE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SourceReviewer {
    /// Create a reviewer for a custom extension list
    pub fn with_extensions(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|known| known == ext))
            .unwrap_or(false)
    }
}

impl CodeReviewer for SourceReviewer {
    fn review(&self, path: &Path) -> Option<String> {
        if !self.is_source(path) {
            return None;
        }
        let content = fs::read(path).ok()?;
        let mut hasher = blake3::Hasher::new();
        for chunk in content.split(|b| b.is_ascii_whitespace()) {
            hasher.update(chunk);
        }
        trace!("Reviewed {:?}", path);
        Some(hasher.finalize().to_hex().to_string())
    }
}
