//! Bounded pipelines and worker pools
//!
//! Every sign or verify operation builds its own queues and workers inside a
//! [`std::thread::scope`]; nothing survives between operations.
//!
//! ## Completion
//!
//! A [`WorkerPool`] hands each worker a [`WaitGroup`] clone. [`close_after`]
//! parks a master thread on the group and only then drops the original output
//! senders, so a collector draining those outputs cannot observe the end of
//! its stream before every worker has finished.

use crossbeam_utils::sync::WaitGroup;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{Scope, ScopedJoinHandle};
use tracing::trace;

pub use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{HqError, Result};

/// Capacities of the bounded queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    /// Paths or parsed records waiting for a worker
    pub feed: usize,
    /// Hash records waiting for the map writer
    pub output: usize,
    /// Failure and found records waiting for their collectors
    pub fail: usize,
}

impl Default for QueueDepths {
    fn default() -> Self {
        Self {
            feed: 10_000,
            output: 100,
            fail: 500,
        }
    }
}

/// Signals that every worker of a pool has returned
#[derive(Debug)]
pub struct Completion {
    wg: WaitGroup,
    name: &'static str,
}

impl Completion {
    /// Block until all workers are done
    pub fn wait(self) {
        self.wg.wait();
        trace!("Worker pool '{}' drained", self.name);
    }
}

/// Fixed-size group of scoped worker threads
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
}

impl WorkerPool {
    /// Create a pool of `size` workers, at least one
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            size: size.max(1),
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Start every worker on `work`, passing its index
    pub fn spawn<'scope, 'env, F>(&self, scope: &'scope Scope<'scope, 'env>, work: F) -> Completion
    where
        F: Fn(usize) + Send + Sync + 'scope,
    {
        let wg = WaitGroup::new();
        let work = Arc::new(work);

        for id in 0..self.size {
            let work = Arc::clone(&work);
            let wg = wg.clone();
            scope.spawn(move || {
                work(id);
                drop(wg);
            });
        }
        trace!("Started {} '{}' workers", self.size, self.name);

        Completion { wg, name: self.name }
    }
}

/// Drop `senders` once `completion` fires
pub fn close_after<'scope, 'env, T>(
    scope: &'scope Scope<'scope, 'env>,
    completion: Completion,
    senders: T,
) -> ScopedJoinHandle<'scope, ()>
where
    T: Send + 'scope,
{
    scope.spawn(move || {
        completion.wait();
        drop(senders);
    })
}

/// Join a scoped thread, turning a panic into an error
pub fn join<T>(handle: ScopedJoinHandle<'_, T>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| HqError::internal(format!("{} thread panicked", what)))
}
