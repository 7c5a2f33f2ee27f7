//! Sign path: tree walk, hash worker pool and map writer
//!
//! ```text
//! TreeWalker ──feed──▶ hash workers (N) ──output──▶ MapWriter ──▶ .hqMAP.*.zst
//! ```
//!
//! The walker runs on its own thread and closes the feed queue when it
//! returns. Hash workers own one [`BlockHasher`] each. The map writer runs on
//! the calling thread and only sees the end of its stream after the worker
//! pool has completed, so the record count always equals the number of paths
//! the walker emitted.

use crate::codereview::CodeReviewer;
use crate::config::HqConfig;
use crate::error::Result;
use crate::hasher::BlockHasher;
use crate::map::{MapWriter, WrittenMap};
use crate::pipeline::{bounded, close_after, join, Receiver, Sender, WorkerPool};
use crate::types::IntegrityRecord;
use crate::walker::TreeWalker;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, instrument, trace};

/// Hash every file under `root` and write the map for generation `ts`
///
/// `reviewer` is consulted for every file when given; files it declines get
/// a content hash only.
///
/// # Errors
///
/// - [`HqError::FatalIo`](crate::HqError::FatalIo) if the root cannot be
///   read or the map cannot be durably written
#[instrument(skip(config, reviewer), fields(workers = config.workers))]
pub fn build_map(
    root: &Path,
    config: &HqConfig,
    reviewer: Option<&dyn CodeReviewer>,
    ts: i64,
) -> Result<WrittenMap> {
    let writer = collect_records(root, config, reviewer)?;
    debug!("Hashed {} files under {:?}", writer.records(), root);
    writer.finish(root, ts, config.map_level)
}

/// Run the walk and hash pool, returning the filled writer
pub fn collect_records(
    root: &Path,
    config: &HqConfig,
    reviewer: Option<&dyn CodeReviewer>,
) -> Result<MapWriter> {
    let walker = TreeWalker::new(root)
        .parallelism(config.sign_walk_parallelism)
        .exclude_artifacts(config.map_clean);
    let queues = config.queues;

    thread::scope(|s| {
        let (feed_tx, feed_rx) = bounded::<PathBuf>(queues.feed);
        let (out_tx, out_rx) = bounded::<IntegrityRecord>(queues.output);

        let walk = s.spawn(move || walker.walk(&feed_tx));

        let done = WorkerPool::new("hash", config.workers).spawn(s, {
            let out_tx = out_tx.clone();
            move |_| hash_worker(root, &feed_rx, &out_tx, reviewer)
        });
        close_after(s, done, out_tx);

        let mut writer = MapWriter::new();
        for record in out_rx.iter() {
            writer.push(&record);
        }

        join(walk, "walker")??;
        Ok(writer)
    })
}

fn hash_worker(
    root: &Path,
    feed: &Receiver<PathBuf>,
    out: &Sender<IntegrityRecord>,
    reviewer: Option<&dyn CodeReviewer>,
) {
    let mut hasher = BlockHasher::new();
    for relative in feed.iter() {
        let full = root.join(&relative);
        let mut record = IntegrityRecord::new(relative, hasher.hash_file(&full));
        if let Some(code_hash) = reviewer.and_then(|r| r.review(&full)) {
            record.code_hash = Some(code_hash);
        }
        trace!("Hashed {:?}", record.path);
        if out.send(record).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codereview::SourceReviewer;
    use crate::compression::decompress;
    use crate::hasher::broken_link_hash;
    use crate::map::MapParser;
    use std::fs;
    use tempfile::TempDir;

    fn config(workers: usize) -> HqConfig {
        HqConfig {
            workers,
            ..Default::default()
        }
    }

    fn parse(written: &WrittenMap) -> Vec<IntegrityRecord> {
        let plain = decompress(&written.compressed).unwrap();
        let mut records: Vec<_> = MapParser::new(&plain).collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    #[test]
    fn test_every_file_recorded_once() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        for i in 0..50 {
            fs::write(root.join("sub").join(format!("f{}", i)), format!("{}", i)).unwrap();
        }

        let written = build_map(root, &config(4), None, 1_700_000_000).unwrap();
        assert_eq!(written.records, 50);
        let records = parse(&written);
        assert_eq!(records.len(), 50);
        assert!(records.iter().all(|r| r.code_hash.is_none()));
    }

    #[test]
    fn test_old_maps_excluded_when_cleaning() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a"), "a").unwrap();

        build_map(root, &config(2), None, 1_600_000_000).unwrap();
        let second = build_map(root, &config(2), None, 1_700_000_000).unwrap();
        assert_eq!(second.records, 1);

        let keep_all = HqConfig {
            map_clean: false,
            ..config(2)
        };
        let third = build_map(root, &keep_all, None, 1_750_000_000).unwrap();
        assert_eq!(third.records, 3);
    }

    #[test]
    fn test_code_review_hashes_for_sources_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("readme.txt"), "hello").unwrap();

        let reviewer = SourceReviewer::default();
        let written = build_map(root, &config(2), Some(&reviewer), 1_700_000_000).unwrap();
        let records = parse(&written);

        assert_eq!(records[0].path, PathBuf::from("main.rs"));
        assert!(records[0].code_hash.is_some());
        assert!(records[1].code_hash.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_gets_sentinel() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::os::unix::fs::symlink(root.join("nowhere"), root.join("dangling")).unwrap();

        let written = build_map(root, &config(1), None, 1_700_000_000).unwrap();
        let records = parse(&written);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content_hash, broken_link_hash());
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let err = build_map(&temp_dir.path().join("missing"), &config(2), None, 1).unwrap_err();
        assert!(err.is_fatal_io());
    }
}
