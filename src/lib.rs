//! # hq - Signed directory integrity maps
//!
//! hq records the exact content of a directory tree in a compact map, binds
//! that map to an identity with a signature container, and later reports
//! every file that was modified, removed or added since.
//!
//! ## Overview
//!
//! - **Sign**: walk a tree, hash every file in parallel, write a compressed
//!   `.hqMAP.*.zst` map and seal it in a `.hqMAP.*.zst.hqs` container
//! - **Verify**: re-hash every recorded file, classify each mismatch, and
//!   list files the map does not know about
//! - **Files and scripts**: sign a single file into `<file>.hqs`, or pack a
//!   script into a self-describing `<file>.hqx`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hq::{HqBuilder, Identity, Owner};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hq = HqBuilder::new().build()?;
//! let identity = Identity::unlock(Owner::new("ops@example.org")?, b"first", b"second");
//!
//! let signed = hq.dir_sign(Path::new("./site"), Some(&identity))?;
//! println!("{} files mapped into {:?}", signed.files_total, signed.map_path);
//!
//! let report = hq.dir_verify(Path::new("./site"))?;
//! for failure in &report.failures {
//!     println!("{:?}: {}", failure.path, failure.reason);
//! }
//! for path in &report.new_files {
//!     println!("{:?}: new", path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure reasons
//!
//! | Code | Meaning |
//! |---|---|
//! | 0 | unable to read the file |
//! | 1 | file removed |
//! | 2 | permission denied |
//! | 3 | content hash mismatch |
//! | 4 | content changed, code-review hash unchanged |
//! | 5 | content and code-review hash changed |
//! | 6 | code-review hash could not be recomputed |
//!
//! Per-file failures never abort a run. Only fatal conditions, such as an
//! unreadable root, a failed write or a malformed container, surface as
//! [`HqError`].
//!
//! ## Module Organization
//!
//! - [`hq`]: the [`Hq`] facade
//! - [`config`]: [`HqConfig`] and [`HqBuilder`]
//! - [`walker`], [`sign`], [`verify`], [`pipeline`]: the concurrent pipelines
//! - [`map`], [`container`]: on-disk formats
//! - [`hasher`], [`codereview`], [`compression`]: content digests
//! - [`identity`], [`crypto`]: tags, keys and signatures
//! - [`types`], [`error`]: shared types

// Public API modules
pub mod codereview;
pub mod compression;
pub mod config;
pub mod container;
pub mod crypto;
pub mod error;
pub mod hasher;
pub mod hq;
pub mod identity;
pub mod map;
pub mod pipeline;
pub mod sign;
pub mod types;
pub mod utils;
pub mod verify;
pub mod walker;

// Internal modules (not part of public API)
mod collections;

// Re-export main types for convenience
pub use codereview::{CodeReviewer, SourceReviewer};
pub use config::{HqBuilder, HqConfig};
pub use container::{Container, ContainerKind, Interpreter};
pub use error::{HqError, Result};
pub use hq::Hq;
pub use identity::{Identity, Keystore, Owner, PublicIdentity, Tag};
pub use types::*;
