//! Directory tree enumeration
//!
//! [`TreeWalker`] streams every non-directory entry under a root as a path
//! relative to that root. Symbolic links are emitted as ordinary entries and
//! never followed.
//!
//! ## Parallelism
//!
//! - `0`: a single-threaded recursive walk in file-name order (`walkdir`)
//! - `N`: a fan-out walk where directory reads are spread over `N` threads
//!   (`ignore`'s parallel walker); emission order is not defined
//!
//! ## Failure policy
//!
//! An unreadable root is fatal. Unreadable subdirectories are logged and
//! skipped.
//!
//! ```rust,no_run
//! use hq::walker::TreeWalker;
//!
//! let files = TreeWalker::new("/srv/site").parallelism(4).collect().unwrap();
//! println!("{} files", files.len());
//! ```

use crate::error::{HqError, Result};
use crate::map::is_map_artifact;
use crate::utils::{make_relative, path_bytes};
use crossbeam_channel::{unbounded, Sender};
use ignore::{WalkBuilder, WalkState};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Tree walker configuration
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    parallelism: usize,
    exclude_artifacts: bool,
}

impl TreeWalker {
    /// Create a sequential walker for `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            parallelism: 0,
            exclude_artifacts: false,
        }
    }

    /// Set the number of walker threads, 0 for a sequential walk
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Skip `.hqMAP.*` maps and containers
    pub fn exclude_artifacts(mut self, exclude: bool) -> Self {
        self.exclude_artifacts = exclude;
        self
    }

    /// Root being walked
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree, sending each relative path into `tx`
    ///
    /// Returns the number of paths sent. Stops early without error if the
    /// receiving side hangs up.
    ///
    /// # Errors
    ///
    /// - [`HqError::FatalIo`] if the root directory cannot be read
    pub fn walk(&self, tx: &Sender<PathBuf>) -> Result<u64> {
        fs::read_dir(&self.root).map_err(|e| HqError::fatal_io(&self.root, e))?;

        let emitted = if self.parallelism == 0 {
            self.walk_sequential(tx)
        } else {
            self.walk_parallel(tx)
        };
        debug!(
            "Walked {:?}: {} entries (parallelism {})",
            self.root, emitted, self.parallelism
        );
        Ok(emitted)
    }

    /// Walk the tree and collect all relative paths
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        let (tx, rx) = unbounded();
        self.walk(&tx)?;
        drop(tx);
        Ok(rx.into_iter().collect())
    }

    fn walk_sequential(&self, tx: &Sender<PathBuf>) -> u64 {
        let mut emitted = 0;
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            if let Some(relative) = self.accept(entry.path()) {
                if tx.send(relative).is_err() {
                    break;
                }
                emitted += 1;
            }
        }
        emitted
    }

    fn walk_parallel(&self, tx: &Sender<PathBuf>) -> u64 {
        let emitted = AtomicU64::new(0);
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .threads(self.parallelism)
            .build_parallel();

        walker.run(|| {
            let tx = tx.clone();
            let emitted = &emitted;
            Box::new(move |entry_result| {
                let entry = match entry_result {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Walk error: {}", e);
                        return WalkState::Continue;
                    }
                };
                if entry.depth() == 0 {
                    return WalkState::Continue;
                }
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if is_dir {
                    return WalkState::Continue;
                }
                if let Some(relative) = self.accept(entry.path()) {
                    if tx.send(relative).is_err() {
                        return WalkState::Quit;
                    }
                    emitted.fetch_add(1, Ordering::Relaxed);
                }
                WalkState::Continue
            })
        });

        emitted.into_inner()
    }

    /// Relative path for `path`, or `None` if it must not be emitted
    ///
    /// Map artifacts are only excluded at the top level, where this root's
    /// generations live. Nested ones are ordinary content.
    fn accept(&self, path: &Path) -> Option<PathBuf> {
        let relative = match make_relative(path, &self.root) {
            Ok(relative) => relative,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                return None;
            }
        };
        if self.exclude_artifacts
            && relative.components().count() == 1
            && relative.file_name().is_some_and(is_map_artifact)
        {
            trace!("Skipping map artifact {:?}", path);
            return None;
        }
        if path_bytes(&relative).contains(&b'\n') {
            warn!("Skipping path with embedded newline: {:?}", relative);
            return None;
        }
        Some(relative)
    }
}
