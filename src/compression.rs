//! Zstandard compression engine for hq
//!
//! Maps and executable payloads are stored zstd-compressed as a whole.
//! Maps favour speed and use a low level; scripts embedded in `.hqx`
//! containers are compressed once and shipped, so they use the maximum.
//!
//! ## Examples
//!
//! ```rust
//! use hq::compression::{CompressionEngine, MAP_LEVEL};
//!
//! let mut engine = CompressionEngine::new();
//! let data = b"src/main.rs\n".repeat(100);
//! let compressed = engine.compress(&data, MAP_LEVEL).unwrap();
//! assert!(compressed.len() < data.len());
//!
//! let decompressed = engine.decompress(&compressed).unwrap();
//! assert_eq!(decompressed, data);
//! ```

use crate::error::{HqError, Result};
use std::time::Instant;
use tracing::debug;

/// Default zstd level for maps
pub const MAP_LEVEL: i32 = 1;

/// Default zstd level for executable payloads
pub const SCRIPT_LEVEL: i32 = 22;

/// Compression statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Number of buffers compressed
    pub buffers_compressed: usize,
    /// Number of buffers decompressed
    pub buffers_decompressed: usize,
    /// Total input bytes seen by `compress`
    pub bytes_in: usize,
    /// Total output bytes produced by `compress`
    pub bytes_out: usize,
    /// Total compression time in milliseconds
    pub compression_time_ms: u64,
    /// Total decompression time in milliseconds
    pub decompression_time_ms: u64,
}

impl CompressionStats {
    /// Output size over input size, 0.0 before anything was compressed
    pub fn ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            return 0.0;
        }
        self.bytes_out as f64 / self.bytes_in as f64
    }
}

/// Compression engine with statistics
///
/// The engine is not thread-safe. Create one per thread if needed.
#[derive(Debug, Default)]
pub struct CompressionEngine {
    stats: CompressionStats,
}

impl CompressionEngine {
    /// Create a new engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current compression statistics
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.stats = CompressionStats::default();
    }

    /// Compress `data` at zstd `level`
    ///
    /// # Errors
    ///
    /// - [`HqError::Compression`] if zstd rejects the input or level
    pub fn compress(&mut self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        let start = Instant::now();
        let compressed = zstd::encode_all(data, level)
            .map_err(|e| HqError::compression(format!("zstd level {}: {}", level, e)))?;

        self.stats.buffers_compressed += 1;
        self.stats.bytes_in += data.len();
        self.stats.bytes_out += compressed.len();
        self.stats.compression_time_ms += start.elapsed().as_millis() as u64;

        debug!(
            "Compressed {} -> {} bytes at level {}",
            data.len(),
            compressed.len(),
            level
        );
        Ok(compressed)
    }

    /// Decompress a zstd frame
    ///
    /// # Errors
    ///
    /// - [`HqError::Decompression`] if `data` is not a valid zstd stream
    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();
        let decompressed =
            zstd::decode_all(data).map_err(|e| HqError::decompression(e.to_string()))?;

        self.stats.buffers_decompressed += 1;
        self.stats.decompression_time_ms += start.elapsed().as_millis() as u64;
        Ok(decompressed)
    }
}

/// Compress with a throwaway engine
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    CompressionEngine::new().compress(data, level)
}

/// Decompress with a throwaway engine
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    CompressionEngine::new().decompress(data)
}
