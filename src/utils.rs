//! Utility functions for hq
//!
//! ## Categories of Utilities
//!
//! ### Paths
//! - Converting absolute paths to root-relative paths
//! - Raw byte views of paths for the map wire format
//!
//! ### Durable writes
//! - Writing a file and syncing it to storage before returning
//! - Permission handling (unix)
//!
//! ### Formatting
//! - Human-readable byte sizes
//! - Unix timestamps rendered as filename-safe RFC 3339

use crate::error::{HqError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Raw bytes of a path, as written into a map
#[cfg(unix)]
pub fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

/// Raw bytes of a path, as written into a map
#[cfg(not(unix))]
pub fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().as_bytes().to_vec()
}

/// Rebuild a path from map bytes
#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

/// Rebuild a path from map bytes
#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Make a path relative to a base path
///
/// A lexical strip is tried first so symbolic links keep their own path
/// instead of resolving to their target.
///
/// # Errors
///
/// - [`HqError::Internal`] if `path` is not below `base`
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            HqError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// Write `content` to `path` and sync it to storage
///
/// The file is created (or truncated) with `mode` on unix. The call does not
/// return until `sync_all` succeeds, so a returned `Ok` means the bytes are
/// durable.
///
/// # Errors
///
/// Every failure is reported as [`HqError::FatalIo`] for `path`.
pub fn synced_write(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options
        .open(path)
        .map_err(|e| HqError::fatal_io(path, e))?;
    file.write_all(content)
        .map_err(|e| HqError::fatal_io(path, e))?;
    file.sync_all().map_err(|e| HqError::fatal_io(path, e))?;

    // The umask may have narrowed the requested mode on create.
    set_permissions(path, mode)?;
    trace!("Synced {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Set unix permissions
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| HqError::fatal_io(path, e))
}

/// Set permissions (no-op outside unix)
#[cfg(not(unix))]
pub fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Render a Unix timestamp as RFC 3339 UTC with `:` replaced by `.`
///
/// ```rust
/// assert_eq!(hq::utils::unix_to_rfc3339(0), "1970-01-01T00.00.00Z");
/// ```
pub fn unix_to_rfc3339(ts: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', ".")
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
