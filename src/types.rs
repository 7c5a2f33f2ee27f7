//! Core data types used throughout the hq library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Map content**: [`IntegrityRecord`] - one file and its digests
//! - **Verification outcome**: [`FailureReason`], [`FailureRecord`], [`VerifyEvent`]
//! - **Operation results**: [`SignReport`], [`VerifyReport`]
//!
//! ## Examples
//!
//! ```rust
//! use hq::types::{FailureReason, VerifyReport};
//!
//! assert_eq!(FailureReason::NotFound.code(), 1);
//! assert_eq!(FailureReason::from_code(3), Some(FailureReason::ContentMismatch));
//!
//! let report = VerifyReport::default();
//! assert!(report.is_valid());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One entry of an integrity map
///
/// Paths are relative to the signed root and must not contain a linefeed.
/// Hashes are 64 lowercase hex characters.
///
/// # Examples
///
/// ```rust
/// # use hq::types::IntegrityRecord;
/// # use std::path::PathBuf;
/// let record = IntegrityRecord::new(PathBuf::from("src/main.rs"), "ab".repeat(32));
/// assert!(record.code_hash.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityRecord {
    /// Relative path from the root directory
    pub path: PathBuf,
    /// BLAKE3-256 of file content, hex encoded
    pub content_hash: String,
    /// Code-review digest, present only for files signed in code-review mode
    pub code_hash: Option<String>,
}

impl IntegrityRecord {
    /// Create a record carrying only a content hash
    pub fn new(path: PathBuf, content_hash: String) -> Self {
        Self {
            path,
            content_hash,
            code_hash: None,
        }
    }

    /// Attach a code-review hash
    pub fn with_code_hash(mut self, code_hash: String) -> Self {
        self.code_hash = Some(code_hash);
        self
    }
}

/// Why a recorded path failed verification
///
/// The numeric codes are stable and appear in reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FailureReason {
    /// Stat or open failed for an unclassified reason
    AccessError = 0,
    /// The file was removed
    NotFound = 1,
    /// The file exists but cannot be read
    PermissionDenied = 2,
    /// Content hash differs, no code-review hash was recorded
    ContentMismatch = 3,
    /// Content hash differs, code-review hash still matches
    ContentMismatchCodeUnchanged = 4,
    /// Content hash and code-review hash both differ
    ContentAndCodeMismatch = 5,
    /// Content hash differs and the code-review hash cannot be recomputed
    CodeUnverifiable = 6,
}

impl FailureReason {
    /// Numeric reason code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Map a numeric code back to a reason
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::AccessError),
            1 => Some(Self::NotFound),
            2 => Some(Self::PermissionDenied),
            3 => Some(Self::ContentMismatch),
            4 => Some(Self::ContentMismatchCodeUnchanged),
            5 => Some(Self::ContentAndCodeMismatch),
            6 => Some(Self::CodeUnverifiable),
            _ => None,
        }
    }

    /// Whether the recorded content hash no longer matches
    pub fn is_content_mismatch(self) -> bool {
        matches!(
            self,
            Self::ContentMismatch
                | Self::ContentMismatchCodeUnchanged
                | Self::ContentAndCodeMismatch
                | Self::CodeUnverifiable
        )
    }

    /// Short human readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::AccessError => "UNABLE TO READ FILE",
            Self::NotFound => "FILE REMOVED",
            Self::PermissionDenied => "UNABLE TO READ FILE [ACCESS:PERMISSION]",
            Self::ContentMismatch => "FILE MODIFIED [FILE HASH MISMATCH]",
            Self::ContentMismatchCodeUnchanged => {
                "FILE MODIFIED [FILE HASH MISMATCH], CODEREVIEW HASH NOT CHANGED"
            }
            Self::ContentAndCodeMismatch => "CODE MODIFIED [CODEREVIEW HASH MISMATCH]",
            Self::CodeUnverifiable => "UNABLE TO VERIFY SIGNED CODE HASH",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Verification-time classification of one recorded path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    /// Path as recorded in the map
    pub path: PathBuf,
    /// Classification
    pub reason: FailureReason,
    /// Content hash recorded at sign time
    pub expected_hash: Option<String>,
    /// Content hash computed now
    pub calculated_hash: Option<String>,
    /// Code-review hash recorded at sign time
    pub expected_code_hash: Option<String>,
    /// Code-review hash computed now
    pub calculated_code_hash: Option<String>,
}

impl FailureRecord {
    /// A failure without hash details (access problems, removals)
    pub fn access(path: PathBuf, reason: FailureReason) -> Self {
        Self {
            path,
            reason,
            expected_hash: None,
            calculated_hash: None,
            expected_code_hash: None,
            calculated_code_hash: None,
        }
    }
}

/// Something the verify pipeline wants to show while it runs
#[derive(Debug, Clone)]
pub enum VerifyEvent {
    /// A recorded path failed verification
    Failure(FailureRecord),
    /// A path on disk is not covered by the map
    NewFile(PathBuf),
    /// The map stopped parsing early
    Corruption {
        /// Last record that parsed completely
        last_valid: String,
    },
}

/// Callback receiving live verify events
pub type EventCallback = Arc<dyn Fn(&VerifyEvent) + Send + Sync>;

/// Result of signing a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignReport {
    /// Directory that was signed
    pub dir: PathBuf,
    /// Written map file
    pub map_path: PathBuf,
    /// Written container, `None` in map-only mode
    pub container_path: Option<PathBuf>,
    /// Identity tag that signed the map
    pub tag: Option<String>,
    /// Records written to the map
    pub files_total: u64,
    /// Size of the compressed map
    pub map_bytes: u64,
    /// Unix timestamp naming the map generation
    pub timestamp: i64,
    /// When the map was durably written
    pub completed_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// Result of verifying a directory against its map
///
/// Content results and signature validity are independent: a tree can be
/// unchanged while its container fails to verify, and vice versa.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Directory that was verified
    pub dir: PathBuf,
    /// Map the directory was compared against
    pub map_path: PathBuf,
    /// Identity tag claimed by the container
    pub tag: Option<String>,
    /// Timestamp recorded in the container
    pub timestamp: Option<i64>,
    /// Records parsed from the map
    pub files_total: u64,
    /// Recorded paths that failed verification
    pub files_fail: u64,
    /// Paths on disk absent from the map
    pub files_new: u64,
    /// Failure details
    pub failures: Vec<FailureRecord>,
    /// New paths, sorted
    pub new_files: Vec<PathBuf>,
    /// Corruption diagnostic if the map stopped parsing early
    pub corruption: Option<String>,
    /// Outcome of the signature check, `None` when it was not performed
    pub signature_valid: Option<bool>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl VerifyReport {
    /// True when no recorded path failed verification
    pub fn is_valid(&self) -> bool {
        self.files_fail == 0
    }

    /// Number of recorded files that verified cleanly
    pub fn files_ok(&self) -> u64 {
        self.files_total.saturating_sub(self.files_fail)
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        let signature = match self.signature_valid {
            Some(true) => "signature valid",
            Some(false) => "signature INVALID",
            None => "signature not checked",
        };
        format!(
            "{} files, {} failed, {} new, {} ({}ms)",
            self.files_total, self.files_fail, self.files_new, signature, self.duration_ms
        )
    }
}

/// Result of checking a single-file container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerifyReport {
    /// Container that was checked
    pub container: PathBuf,
    /// Claimed identity tag
    pub tag: String,
    /// Owner id stored with the public key
    pub owner: String,
    /// Signing time
    pub timestamp: i64,
    /// Whether the signature matches the content and identity
    pub signature_valid: bool,
    /// Interpreter token for executable containers
    pub interpreter: Option<String>,
    /// Decompressed script of an executable container
    #[serde(skip)]
    pub script: Option<Vec<u8>>,
}
