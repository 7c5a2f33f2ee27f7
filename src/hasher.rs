//! Streaming block hasher
//!
//! Files are read in fixed 32 KiB blocks and every block is fed to BLAKE3 at
//! full width. A short final block is zero-padded, and a file whose length is
//! an exact multiple of the block size gets one extra all-zero block. Maps
//! written by earlier releases depend on this padding, so it must not change.
//!
//! A file that cannot be opened hashes to [`broken_link_hash`], the digest of
//! one zero block. Verification compares against that value directly to
//! recognise broken symlinks that were recorded at sign time.
//!
//! ```rust
//! use hq::hasher::{BlockHasher, broken_link_hash};
//! use std::path::Path;
//!
//! let mut hasher = BlockHasher::new();
//! let hash = hasher.hash_file(Path::new("/definitely/not/here"));
//! assert_eq!(hash, broken_link_hash());
//! ```

use crate::error::{HqError, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::OnceLock;

/// Read block size
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Length of a hex encoded 256-bit digest
pub const HEX_HASH_LEN: usize = 64;

/// Length of the 512-bit message digest
pub const MESSAGE_DIGEST_LEN: usize = 64;

static BROKEN_LINK_HASH: OnceLock<String> = OnceLock::new();

/// Content hash recorded for paths that could not be opened at sign time
///
/// Equal to the hash of an empty file: a single zero block. Older maps
/// carry `ac169ead597dac88b2d7223edd85c9895392532cfc7a3c5c29a3fbe3ccba37f2`
/// for this case.
pub fn broken_link_hash() -> &'static str {
    BROKEN_LINK_HASH.get_or_init(|| {
        let zero = vec![0u8; BLOCK_SIZE];
        blake3::hash(&zero).to_hex().to_string()
    })
}

/// Per-worker hashing state
///
/// Owns its block buffer so a worker never allocates per file.
#[derive(Debug)]
pub struct BlockHasher {
    buf: Vec<u8>,
}

impl Default for BlockHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockHasher {
    /// Create a hasher with a fresh block buffer
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; BLOCK_SIZE],
        }
    }

    /// Feed `reader` block by block into a BLAKE3 state
    ///
    /// Read errors end the stream; whatever was read so far is kept.
    pub fn absorb<R: Read>(&mut self, mut reader: R) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        loop {
            self.buf.fill(0);
            let filled = fill_block(&mut reader, &mut self.buf);
            hasher.update(&self.buf);
            if filled < BLOCK_SIZE {
                break;
            }
        }
        hasher
    }

    /// Hash a file, reporting open failures
    pub fn try_hash_file(&mut self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        Ok(self.absorb(file).finalize().to_hex().to_string())
    }

    /// Hash a file, mapping open failures to [`broken_link_hash`]
    pub fn hash_file(&mut self, path: &Path) -> String {
        match self.try_hash_file(path) {
            Ok(hash) => hash,
            Err(_) => broken_link_hash().to_string(),
        }
    }

    /// 512-bit digest over `reader` with the same block padding
    pub fn digest_512<R: Read>(&mut self, reader: R) -> [u8; MESSAGE_DIGEST_LEN] {
        let mut out = [0u8; MESSAGE_DIGEST_LEN];
        self.absorb(reader).finalize_xof().fill(&mut out);
        out
    }
}

/// 512-bit message digest of an in-memory buffer
pub fn digest_512(data: &[u8]) -> [u8; MESSAGE_DIGEST_LEN] {
    BlockHasher::new().digest_512(data)
}

/// 512-bit message digest of a file
///
/// # Errors
///
/// - [`HqError::FatalIo`] if the file cannot be opened
pub fn file_digest_512(path: &Path) -> Result<[u8; MESSAGE_DIGEST_LEN]> {
    let file = File::open(path).map_err(|e| HqError::fatal_io(path, e))?;
    Ok(BlockHasher::new().digest_512(file))
}

/// Plain 512-bit BLAKE3 digest, no block padding
pub fn blake3_512(data: &[u8]) -> [u8; MESSAGE_DIGEST_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    let mut out = [0u8; MESSAGE_DIGEST_LEN];
    hasher.finalize_xof().fill(&mut out);
    out
}

fn fill_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    filled
}
