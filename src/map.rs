//! Integrity map format
//!
//! ## Wire format
//!
//! A map is the zstd-compressed concatenation of one frame per record:
//!
//! ```text
//! <path bytes> LF <64 hex content hash> LF [ <64 hex code-review hash> LF ] LF
//! ```
//!
//! Hashes are fixed width, so the parser reads them at fixed offsets once it
//! has found the end of the path.
//!
//! ## File naming
//!
//! `.hqMAP.<unix seconds>.<RFC 3339 UTC, ':' replaced by '.'>.zst`, 42 bytes
//! for any timestamp between 2001 and 2286. The signed container sits next to
//! it with an extra `.hqs` suffix.
//!
//! ## Corruption
//!
//! [`MapParser`] stops at the first frame that is cut short or malformed. The
//! records yielded before that point are still usable and
//! [`MapParser::corruption`] reports where parsing stopped.

use crate::compression::CompressionEngine;
use crate::error::{HqError, Result};
use crate::hasher::HEX_HASH_LEN;
use crate::types::IntegrityRecord;
use crate::utils::{path_bytes, path_from_bytes, synced_write, unix_to_rfc3339};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name prefix shared by maps and their containers
pub const MAP_PREFIX: &str = ".hqMAP.";

/// Compressed map extension
pub const MAP_EXT: &str = ".zst";

/// Extension of signed containers
pub const CONTAINER_EXT: &str = ".hqs";

/// Extension of executable containers
pub const EXECUTABLE_EXT: &str = ".hqx";

/// Exact length of a map file name
pub const MAP_NAME_LEN: usize = 42;

/// Names at or below this length are never treated as map artifacts
const ARTIFACT_MIN_LEN: usize = 39;

/// Permissions of written maps
pub const MAP_MODE: u32 = 0o640;

const LF: u8 = b'\n';

/// Map file name for a sign run at `ts`
///
/// ```rust
/// let name = hq::map::map_file_name(1_700_000_000);
/// assert_eq!(name, ".hqMAP.1700000000.2023-11-14T22.13.20Z.zst");
/// assert_eq!(name.len(), hq::map::MAP_NAME_LEN);
/// ```
pub fn map_file_name(ts: i64) -> String {
    format!("{}{}.{}{}", MAP_PREFIX, ts, unix_to_rfc3339(ts), MAP_EXT)
}

/// Container path for a map
pub fn container_path(map_path: &Path) -> PathBuf {
    let mut name = map_path.as_os_str().to_os_string();
    name.push(CONTAINER_EXT);
    PathBuf::from(name)
}

/// Whether a file name belongs to a map generation (map or container)
///
/// Only the prefix and a minimum length are checked. The extension is left
/// open so a generation's `.hqs` container is matched along with its map.
pub fn is_map_artifact(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with(MAP_PREFIX) && name.len() > ARTIFACT_MIN_LEN
}

/// Append the wire frame of `record` to `buf`
pub fn encode_record(buf: &mut Vec<u8>, record: &IntegrityRecord) {
    buf.extend_from_slice(&path_bytes(&record.path));
    buf.push(LF);
    buf.extend_from_slice(record.content_hash.as_bytes());
    buf.push(LF);
    if let Some(code_hash) = &record.code_hash {
        buf.extend_from_slice(code_hash.as_bytes());
        buf.push(LF);
    }
    buf.push(LF);
}

/// Streaming parser over a decompressed map buffer
///
/// ```rust
/// use hq::map::{encode_record, MapParser};
/// use hq::types::IntegrityRecord;
///
/// let mut buf = Vec::new();
/// encode_record(&mut buf, &IntegrityRecord::new("a.txt".into(), "0".repeat(64)));
///
/// let mut parser = MapParser::new(&buf);
/// let records: Vec<_> = parser.by_ref().collect();
/// assert_eq!(records.len(), 1);
/// assert!(parser.corruption().is_none());
/// ```
#[derive(Debug)]
pub struct MapParser<'a> {
    buf: &'a [u8],
    pos: usize,
    count: u64,
    last_valid: Option<PathBuf>,
    corruption: Option<HqError>,
}

impl<'a> MapParser<'a> {
    /// Create a parser over `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            count: 0,
            last_valid: None,
            corruption: None,
        }
    }

    /// Records yielded so far
    pub fn records(&self) -> u64 {
        self.count
    }

    /// Where parsing stopped, if it stopped early
    pub fn corruption(&self) -> Option<&HqError> {
        self.corruption.as_ref()
    }

    /// Consume the parser, returning the record count and any corruption
    pub fn finish(self) -> (u64, Option<HqError>) {
        (self.count, self.corruption)
    }

    fn corrupt(&mut self, offset: usize) -> Option<IntegrityRecord> {
        let last_valid = self
            .last_valid
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        warn!(
            "Input map is corrupt at byte {} [last valid: {}]",
            offset, last_valid
        );
        self.corruption = Some(HqError::MapCorrupt { last_valid, offset });
        self.pos = self.buf.len();
        None
    }

    /// Read a fixed-width hash followed by LF at `self.pos`
    fn take_hash(&mut self) -> Option<String> {
        let start = self.pos;
        let end = start + HEX_HASH_LEN;
        if end >= self.buf.len() || self.buf[end] != LF {
            return None;
        }
        let hash = &self.buf[start..end];
        if !hash.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        self.pos = end + 1;
        // The hash bytes are ASCII hex, checked above.
        Some(String::from_utf8_lossy(hash).into_owned())
    }
}

impl Iterator for MapParser<'_> {
    type Item = IntegrityRecord;

    fn next(&mut self) -> Option<IntegrityRecord> {
        if self.corruption.is_some() {
            return None;
        }

        loop {
            if self.pos >= self.buf.len() {
                return None;
            }
            let rest = &self.buf[self.pos..];
            let Some(lf) = rest.iter().position(|&b| b == LF) else {
                return self.corrupt(self.pos);
            };
            if lf == 0 {
                self.pos += 1;
                continue;
            }

            let path = path_from_bytes(&rest[..lf]);
            let record_start = self.pos;
            self.pos += lf + 1;

            let Some(content_hash) = self.take_hash() else {
                return self.corrupt(record_start);
            };
            let mut record = IntegrityRecord::new(path, content_hash);

            if self.pos < self.buf.len() && self.buf[self.pos] != LF {
                let Some(code_hash) = self.take_hash() else {
                    return self.corrupt(record_start);
                };
                record.code_hash = Some(code_hash);
            }
            if self.pos < self.buf.len() && self.buf[self.pos] == LF {
                self.pos += 1;
            }

            self.count += 1;
            self.last_valid = Some(record.path.clone());
            return Some(record);
        }
    }
}

/// A map that has been durably written
#[derive(Debug, Clone)]
pub struct WrittenMap {
    /// Location of the compressed map
    pub path: PathBuf,
    /// Records in the map
    pub records: u64,
    /// Unix timestamp in the file name
    pub timestamp: i64,
    /// Compressed bytes as written
    pub compressed: Vec<u8>,
}

/// Accumulates record frames for one map generation
#[derive(Debug, Default)]
pub struct MapWriter {
    buf: Vec<u8>,
    records: u64,
}

impl MapWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record
    pub fn push(&mut self, record: &IntegrityRecord) {
        encode_record(&mut self.buf, record);
        self.records += 1;
    }

    /// Records appended so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Uncompressed frames
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Compress and durably write the map into `dir`
    ///
    /// # Errors
    ///
    /// - [`HqError::Compression`] if compression fails
    /// - [`HqError::FatalIo`] if the write or sync fails
    pub fn finish(self, dir: &Path, ts: i64, level: i32) -> Result<WrittenMap> {
        let compressed = CompressionEngine::new().compress(&self.buf, level)?;
        let path = dir.join(map_file_name(ts));
        synced_write(&path, &compressed, MAP_MODE)?;

        info!(
            "Wrote map {:?}: {} records, {} bytes",
            path,
            self.records,
            compressed.len()
        );
        Ok(WrittenMap {
            path,
            records: self.records,
            timestamp: ts,
            compressed,
        })
    }
}

/// Locate the newest map in `dir`
///
/// With `ts_prefix`, only maps whose timestamp starts with it are considered.
///
/// # Errors
///
/// - [`HqError::FatalIo`] if `dir` cannot be read
/// - [`HqError::MapNotFound`] if nothing matches
pub fn find_map(dir: &Path, ts_prefix: Option<&str>) -> Result<PathBuf> {
    let pattern = format!("{}{}", MAP_PREFIX, ts_prefix.unwrap_or(""));
    let entries = fs::read_dir(dir).map_err(|e| HqError::fatal_io(dir, e))?;

    let mut best: Option<String> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.len() != MAP_NAME_LEN || !name.starts_with(&pattern) || !name.ends_with(MAP_EXT) {
            continue;
        }
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(true) {
            continue;
        }
        if best.as_ref().map_or(true, |current| name > *current) {
            best = Some(name);
        }
    }

    match best {
        Some(name) => {
            debug!("Selected map {}", name);
            Ok(dir.join(name))
        }
        None => Err(HqError::MapNotFound {
            dir: dir.to_path_buf(),
            pattern,
        }),
    }
}

/// Delete previous map generations from `dir`
///
/// Entries whose name starts with the file name of `keep` survive. Failures
/// to delete are logged, not returned.
pub fn clean_maps(dir: &Path, keep: &Path) -> Result<usize> {
    let keep_name = keep
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let entries = fs::read_dir(dir).map_err(|e| HqError::fatal_io(dir, e))?;

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_map_artifact(&name) || name.to_string_lossy().starts_with(&keep_name) {
            continue;
        }
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(true) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed old map artifact {:?}", name);
                removed += 1;
            }
            Err(e) => warn!("Unable to remove {:?}: {}", entry.path(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::decompress;
    use tempfile::TempDir;

    fn record(path: &str, fill: char) -> IntegrityRecord {
        IntegrityRecord::new(PathBuf::from(path), fill.to_string().repeat(64))
    }

    #[test]
    fn test_encode_layout() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &record("a", 'a'));
        let expected = format!("a\n{}\n\n", "a".repeat(64));
        assert_eq!(buf, expected.as_bytes());

        let mut buf = Vec::new();
        encode_record(&mut buf, &record("b", 'b').with_code_hash("c".repeat(64)));
        let expected = format!("b\n{}\n{}\n\n", "b".repeat(64), "c".repeat(64));
        assert_eq!(buf, expected.as_bytes());
    }

    #[test]
    fn test_parse_mixed_records() {
        let records = vec![
            record("a.txt", '1'),
            record("dir/b.rs", '2').with_code_hash("3".repeat(64)),
            record("c", '4'),
        ];
        let mut buf = b"\n\n".to_vec();
        for r in &records {
            encode_record(&mut buf, r);
        }

        let mut parser = MapParser::new(&buf);
        let parsed: Vec<_> = parser.by_ref().collect();
        assert_eq!(parsed, records);
        assert_eq!(parser.records(), 3);
        assert!(parser.corruption().is_none());
    }

    #[test]
    fn test_missing_final_blank_line_is_accepted() {
        let buf = format!("a\n{}\n", "a".repeat(64));
        let (count, corruption) = {
            let mut parser = MapParser::new(buf.as_bytes());
            parser.by_ref().for_each(drop);
            parser.finish()
        };
        assert_eq!(count, 1);
        assert!(corruption.is_none());
    }

    #[test]
    fn test_truncated_hash_stops_parsing() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &record("first", 'a'));
        encode_record(&mut buf, &record("second", 'b'));
        let cut = buf.len() - 20;

        let mut parser = MapParser::new(&buf[..cut]);
        let parsed: Vec<_> = parser.by_ref().collect();
        assert_eq!(parsed.len(), 1);
        match parser.corruption() {
            Some(HqError::MapCorrupt { last_valid, .. }) => assert_eq!(last_valid, "first"),
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_path_is_corruption() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &record("first", 'a'));
        buf.extend_from_slice(b"half-written");

        let mut parser = MapParser::new(&buf);
        assert_eq!(parser.by_ref().count(), 1);
        assert!(parser.corruption().is_some());
    }

    #[test]
    fn test_non_hex_hash_is_corruption() {
        let buf = format!("a\n{}\n\n", "z".repeat(64));
        let mut parser = MapParser::new(buf.as_bytes());
        assert!(parser.next().is_none());
        assert!(parser.corruption().is_some());
    }

    #[test]
    fn test_artifact_names() {
        assert!(is_map_artifact(OsStr::new(&map_file_name(1_700_000_000))));
        assert!(is_map_artifact(OsStr::new(".hqMAP.1700000000.2023-11-14T22.13.20Z.zst.hqs")));
        assert!(!is_map_artifact(OsStr::new(".hqMAP.short")));
        assert!(!is_map_artifact(OsStr::new("hqMAP.1700000000.2023-11-14T22.13.20Z.zst")));
    }

    #[test]
    fn test_writer_roundtrip_and_discovery() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = MapWriter::new();
        writer.push(&record("a", 'a'));
        writer.push(&record("b", 'b'));

        let written = writer.finish(temp_dir.path(), 1_700_000_000, 1).unwrap();
        assert_eq!(written.records, 2);
        assert_eq!(fs::read(&written.path).unwrap(), written.compressed);

        let plain = decompress(&written.compressed).unwrap();
        assert_eq!(MapParser::new(&plain).collect::<Vec<_>>().len(), 2);

        let found = find_map(temp_dir.path(), None).unwrap();
        assert_eq!(found, written.path);
    }

    #[test]
    fn test_find_map_picks_newest_and_filters() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for ts in [1_600_000_000i64, 1_700_000_000, 1_650_000_000] {
            fs::write(dir.join(map_file_name(ts)), b"").unwrap();
        }
        fs::create_dir(dir.join(map_file_name(1_800_000_000))).unwrap();
        fs::write(container_path(&dir.join(map_file_name(1_900_000_000))), b"").unwrap();

        let newest = find_map(dir, None).unwrap();
        assert_eq!(newest, dir.join(map_file_name(1_700_000_000)));

        let older = find_map(dir, Some("16")).unwrap();
        assert_eq!(older, dir.join(map_file_name(1_650_000_000)));

        let err = find_map(dir, Some("12")).unwrap_err();
        assert!(matches!(err, HqError::MapNotFound { .. }));
    }

    #[test]
    fn test_clean_keeps_current_generation() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let old = dir.join(map_file_name(1_600_000_000));
        let current = dir.join(map_file_name(1_700_000_000));
        for path in [&old, &current] {
            fs::write(path, b"").unwrap();
            fs::write(container_path(path), b"").unwrap();
        }
        fs::write(dir.join("data.txt"), b"keep me").unwrap();

        assert_eq!(clean_maps(dir, &current).unwrap(), 2);
        assert!(!old.exists());
        assert!(current.exists());
        assert!(container_path(&current).exists());
        assert!(dir.join("data.txt").exists());
    }
}
