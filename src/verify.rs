//! Verify path: map feeder, verify worker pool, diff engine and aggregation
//!
//! ```text
//!                ┌──found──▶ found collector ─┐
//! MapParser ─feed─▶ verify workers (N)        ├─▶ diff ─▶ new files
//!                └──fail───▶ fail collector   │
//! TreeWalker (current state) ─────────────────┘
//! ```
//!
//! Every collector is the single owner of what it builds. Failures, new
//! files and corruption diagnostics are also forwarded to a display sink
//! thread that logs them and hands them to an optional [`EventCallback`].

use crate::codereview::CodeReviewer;
use crate::collections::HashSet;
#[cfg(feature = "gxhash")]
use crate::collections::HashSetExt;
use crate::config::HqConfig;
use crate::error::{HqError, Result};
use crate::hasher::{broken_link_hash, BlockHasher};
use crate::map::MapParser;
use crate::pipeline::{bounded, close_after, join, Receiver, Sender, WorkerPool};
use crate::types::{EventCallback, FailureReason, FailureRecord, IntegrityRecord, VerifyEvent};
use crate::walker::TreeWalker;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, instrument, warn};

/// Aggregated outcome of comparing a tree against a map
#[derive(Debug, Default)]
pub struct VerifyOutcome {
    /// Records parsed from the map
    pub files_total: u64,
    /// Classified failures, in arrival order
    pub failures: Vec<FailureRecord>,
    /// Paths on disk that the map does not cover, sorted
    pub new_files: Vec<PathBuf>,
    /// Set when the map stopped parsing early
    pub corruption: Option<HqError>,
}

impl VerifyOutcome {
    /// Number of failed records
    pub fn files_fail(&self) -> u64 {
        self.failures.len() as u64
    }
}

/// What verifying one record produced
#[derive(Debug, PartialEq, Eq)]
pub struct Check {
    /// The path exists and must not be reported as new
    pub found: bool,
    /// Classification when verification failed
    pub failure: Option<FailureRecord>,
}

impl Check {
    fn ok() -> Self {
        Self {
            found: true,
            failure: None,
        }
    }

    fn missing(path: &Path, reason: FailureReason) -> Self {
        Self {
            found: false,
            failure: Some(FailureRecord::access(path.to_path_buf(), reason)),
        }
    }
}

/// Compare `root` against a decompressed map
///
/// # Errors
///
/// - [`HqError::FatalIo`] if the root cannot be walked
#[instrument(skip(map, config, reviewer, events), fields(map_bytes = map.len()))]
pub fn verify_tree(
    root: &Path,
    map: &[u8],
    config: &HqConfig,
    reviewer: Option<&dyn CodeReviewer>,
    events: Option<EventCallback>,
) -> Result<VerifyOutcome> {
    let queues = config.queues;
    let current = TreeWalker::new(root)
        .parallelism(config.verify_walk_parallelism)
        .exclude_artifacts(true);

    thread::scope(|s| {
        let (feed_tx, feed_rx) = bounded::<IntegrityRecord>(queues.feed);
        let (found_tx, found_rx) = bounded::<PathBuf>(queues.fail);
        let (fail_tx, fail_rx) = bounded::<FailureRecord>(queues.fail);
        let (event_tx, event_rx) = bounded::<VerifyEvent>(queues.output);

        let display = s.spawn(move || display_sink(event_rx, events));
        let walk = s.spawn(move || current.collect());
        let feeder = s.spawn(move || feed_map(map, feed_tx));

        let done = WorkerPool::new("verify", config.workers).spawn(s, {
            let found_tx = found_tx.clone();
            let fail_tx = fail_tx.clone();
            move |_| verify_worker(root, &feed_rx, &found_tx, &fail_tx, reviewer)
        });
        close_after(s, done, (found_tx, fail_tx));

        let found = s.spawn(move || {
            let mut found = HashSet::with_capacity(1024);
            for path in found_rx.iter() {
                found.insert(path);
            }
            found
        });

        let mut failures = Vec::new();
        for failure in fail_rx.iter() {
            let _ = event_tx.send(VerifyEvent::Failure(failure.clone()));
            failures.push(failure);
        }

        let (files_total, corruption) = join(feeder, "map feeder")?;
        if let Some(HqError::MapCorrupt { last_valid, .. }) = &corruption {
            let _ = event_tx.send(VerifyEvent::Corruption {
                last_valid: last_valid.clone(),
            });
        }

        let found = join(found, "found collector")?;
        let mut new_files: Vec<PathBuf> = join(walk, "walker")??
            .into_iter()
            .filter(|path| !found.contains(path))
            .collect();
        new_files.sort();
        for path in &new_files {
            let _ = event_tx.send(VerifyEvent::NewFile(path.clone()));
        }
        drop(event_tx);
        join(display, "display sink")?;

        info!(
            "Verified {} records: {} failed, {} new",
            files_total,
            failures.len(),
            new_files.len()
        );
        Ok(VerifyOutcome {
            files_total,
            failures,
            new_files,
            corruption,
        })
    })
}

fn feed_map(map: &[u8], feed: Sender<IntegrityRecord>) -> (u64, Option<HqError>) {
    let mut parser = MapParser::new(map);
    for record in parser.by_ref() {
        if feed.send(record).is_err() {
            break;
        }
    }
    parser.finish()
}

fn verify_worker(
    root: &Path,
    feed: &Receiver<IntegrityRecord>,
    found: &Sender<PathBuf>,
    fail: &Sender<FailureRecord>,
    reviewer: Option<&dyn CodeReviewer>,
) {
    let mut hasher = BlockHasher::new();
    for record in feed.iter() {
        let check = check_record(root, &record, &mut hasher, reviewer);
        if check.found && found.send(record.path).is_err() {
            break;
        }
        if let Some(failure) = check.failure {
            if fail.send(failure).is_err() {
                break;
            }
        }
    }
}

/// Verify one record against the file under `root`
pub fn check_record(
    root: &Path,
    record: &IntegrityRecord,
    hasher: &mut BlockHasher,
    reviewer: Option<&dyn CodeReviewer>,
) -> Check {
    let full = root.join(&record.path);
    let recorded_broken = record.content_hash == broken_link_hash();

    let metadata = match fs::metadata(&full) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if recorded_broken && is_symlink(&full) {
                return Check::ok();
            }
            return Check::missing(&record.path, FailureReason::NotFound);
        }
        Err(e) => return Check::missing(&record.path, access_reason(&e)),
    };
    if metadata.is_dir() {
        return Check::ok();
    }

    let calculated = match hasher.try_hash_file(&full) {
        Ok(hash) => hash,
        Err(_) if recorded_broken => return Check::ok(),
        Err(e) => {
            return Check {
                found: true,
                failure: Some(FailureRecord::access(record.path.clone(), access_reason(&e))),
            }
        }
    };
    if calculated == record.content_hash {
        return Check::ok();
    }

    let mut failure = FailureRecord {
        path: record.path.clone(),
        reason: FailureReason::ContentMismatch,
        expected_hash: Some(record.content_hash.clone()),
        calculated_hash: Some(calculated),
        expected_code_hash: record.code_hash.clone(),
        calculated_code_hash: None,
    };
    if let Some(expected_code) = &record.code_hash {
        failure.calculated_code_hash = reviewer.and_then(|r| r.review(&full));
        failure.reason = match &failure.calculated_code_hash {
            None => FailureReason::CodeUnverifiable,
            Some(code) if code != expected_code => FailureReason::ContentAndCodeMismatch,
            Some(_) => FailureReason::ContentMismatchCodeUnchanged,
        };
    }
    Check {
        found: true,
        failure: Some(failure),
    }
}

fn access_reason(e: &io::Error) -> FailureReason {
    match e.kind() {
        io::ErrorKind::NotFound => FailureReason::NotFound,
        io::ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
        _ => FailureReason::AccessError,
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn display_sink(events: Receiver<VerifyEvent>, callback: Option<EventCallback>) {
    for event in events.iter() {
        match &event {
            VerifyEvent::Failure(failure) => warn!(
                path = ?failure.path,
                code = failure.reason.code(),
                "{}",
                failure.reason.description()
            ),
            VerifyEvent::NewFile(path) => info!(path = ?path, "new file"),
            VerifyEvent::Corruption { last_valid } => {
                debug!("Map corruption after {:?}", last_valid)
            }
        }
        if let Some(callback) = &callback {
            callback(&event);
        }
    }
}
