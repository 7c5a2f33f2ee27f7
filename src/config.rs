//! Configuration for hq operations
//!
//! [`HqConfig`] holds every tunable of a sign or verify run. It is plain data
//! (serde serializable) and is usually built through [`HqBuilder`]:
//!
//! ```rust,no_run
//! use hq::HqBuilder;
//!
//! let hq = HqBuilder::new()
//!     .workers(8)
//!     .map_clean(false)
//!     .code_review(true)
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Environment
//!
//! [`HqConfig::from_env`] starts from the defaults and applies:
//!
//! | Variable | Effect |
//! |---|---|
//! | `HQ_MAP_CLEAN` | forces `map_clean` on |
//! | `HQ_MAP_ONLY` | forces `map_only` on |
//! | `HQ_KEYSTORE` | keystore directory |
//! | `HQ_WORKERS` | worker count |

use crate::codereview::{CodeReviewer, SourceReviewer};
use crate::compression::{MAP_LEVEL, SCRIPT_LEVEL};
use crate::error::{HqError, Result};
use crate::hq::Hq;
use crate::pipeline::QueueDepths;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Walk parallelism used for the verify-side current-state walk
pub const VERIFY_WALK_PARALLELISM: usize = 2;

/// Settings for one [`Hq`] instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HqConfig {
    /// Hash and verify worker count
    pub workers: usize,
    /// Walker threads when signing, 0 for a sequential walk
    pub sign_walk_parallelism: usize,
    /// Walker threads for the current-state walk during verification
    pub verify_walk_parallelism: usize,
    /// Exclude map artifacts from the sign walk and delete old generations
    pub map_clean: bool,
    /// Write the map without signing it
    pub map_only: bool,
    /// Record code-review hashes while signing
    pub code_review: bool,
    /// zstd level for maps
    pub map_level: i32,
    /// zstd level for executable payloads
    pub script_level: i32,
    /// Bounded queue capacities
    pub queues: QueueDepths,
    /// Directory holding public keys
    pub keystore: PathBuf,
    /// Timestamp prefix used to pick a map when verifying
    pub target_timestamp: Option<String>,
}

impl Default for HqConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            sign_walk_parallelism: 0,
            verify_walk_parallelism: VERIFY_WALK_PARALLELISM,
            map_clean: true,
            map_only: false,
            code_review: false,
            map_level: MAP_LEVEL,
            script_level: SCRIPT_LEVEL,
            queues: QueueDepths::default(),
            keystore: default_keystore(),
            target_timestamp: None,
        }
    }
}

impl HqConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env::var_os("HQ_MAP_CLEAN").is_some() {
            config.map_clean = true;
        }
        if env::var_os("HQ_MAP_ONLY").is_some() {
            config.map_only = true;
        }
        if let Some(dir) = env::var_os("HQ_KEYSTORE") {
            config.keystore = PathBuf::from(dir);
        }
        if let Some(workers) = env::var("HQ_WORKERS").ok().and_then(|w| w.parse().ok()) {
            config.workers = workers;
        }
        debug!("Configuration from environment: {:?}", config);
        config
    }

    /// Check the configuration for values no run can use
    ///
    /// # Errors
    ///
    /// - [`HqError::InvalidConfiguration`] naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HqError::InvalidConfiguration("workers must be at least 1".into()));
        }
        for (name, level) in [("map_level", self.map_level), ("script_level", self.script_level)] {
            if !(1..=22).contains(&level) {
                return Err(HqError::InvalidConfiguration(format!(
                    "{} must be between 1 and 22, got {}",
                    name, level
                )));
            }
        }
        let q = &self.queues;
        if q.feed == 0 || q.output == 0 || q.fail == 0 {
            return Err(HqError::InvalidConfiguration("queue depths must be non-zero".into()));
        }
        if let Some(ts) = &self.target_timestamp {
            if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
                return Err(HqError::InvalidConfiguration(format!(
                    "target timestamp must be decimal digits, got {:?}",
                    ts
                )));
            }
        }
        Ok(())
    }
}

fn default_keystore() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join(".hq")
}

/// Builder for [`Hq`] instances
pub struct HqBuilder {
    config: HqConfig,
    reviewer: Option<Arc<dyn CodeReviewer>>,
}

impl Default for HqBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HqBuilder {
    /// Start from [`HqConfig::default`]
    pub fn new() -> Self {
        Self::from_config(HqConfig::default())
    }

    /// Start from an existing configuration
    pub fn from_config(config: HqConfig) -> Self {
        Self {
            config,
            reviewer: None,
        }
    }

    /// Set the number of hash and verify workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set walker threads for signing
    pub fn sign_walk_parallelism(mut self, threads: usize) -> Self {
        self.config.sign_walk_parallelism = threads;
        self
    }

    /// Set walker threads for the verify-side walk
    pub fn verify_walk_parallelism(mut self, threads: usize) -> Self {
        self.config.verify_walk_parallelism = threads;
        self
    }

    /// Enable or disable map cleaning
    pub fn map_clean(mut self, clean: bool) -> Self {
        self.config.map_clean = clean;
        self
    }

    /// Write maps without signing them
    pub fn map_only(mut self, map_only: bool) -> Self {
        self.config.map_only = map_only;
        self
    }

    /// Record code-review hashes when signing
    pub fn code_review(mut self, enabled: bool) -> Self {
        self.config.code_review = enabled;
        self
    }

    /// Set the zstd level used for maps
    pub fn map_level(mut self, level: i32) -> Self {
        self.config.map_level = level;
        self
    }

    /// Set the bounded queue capacities
    pub fn queues(mut self, queues: QueueDepths) -> Self {
        self.config.queues = queues;
        self
    }

    /// Set the keystore directory
    pub fn keystore(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.keystore = dir.into();
        self
    }

    /// Verify against the newest map whose timestamp starts with `prefix`
    pub fn target_timestamp(mut self, prefix: impl Into<String>) -> Self {
        self.config.target_timestamp = Some(prefix.into());
        self
    }

    /// Replace the code-review hash function
    pub fn reviewer(mut self, reviewer: Arc<dyn CodeReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Validate the configuration and build the instance
    ///
    /// # Errors
    ///
    /// - [`HqError::InvalidConfiguration`] if validation fails
    pub fn build(self) -> Result<Hq> {
        self.config.validate()?;
        let reviewer = self
            .reviewer
            .unwrap_or_else(|| Arc::new(SourceReviewer::default()));
        Ok(Hq::with_config(self.config, reviewer))
    }
}
