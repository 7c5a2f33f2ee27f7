//! Main hq implementation
//!
//! [`Hq`] ties the pipelines, the container codec and the keystore together
//! into the operations a user runs:
//!
//! - [`Hq::dir_sign`] / [`Hq::dir_verify`]: directory maps
//! - [`Hq::file_sign`] / [`Hq::file_verify`]: single files
//! - [`Hq::file_sign_executable`] / [`Hq::verify_executable`]: `.hqx` scripts
//! - [`Hq::generate`]: new identities
//!
//! ## Examples
//!
//! ```rust,no_run
//! use hq::{HqBuilder, Identity, Owner};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hq = HqBuilder::new().keystore("/tmp/keys").build()?;
//! let owner = Owner::new("ops@example.org")?;
//! hq.generate(owner.clone(), b"first", b"second", true)?;
//!
//! let identity = Identity::unlock(owner, b"first", b"second");
//! hq.dir_sign(Path::new("/srv/site"), Some(&identity))?;
//!
//! let report = hq.dir_verify(Path::new("/srv/site"))?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

use crate::codereview::CodeReviewer;
use crate::compression::CompressionEngine;
use crate::config::HqConfig;
use crate::container::{Container, ContainerKind, Interpreter};
use crate::crypto::{signed_message, Ed25519Verifier, Verifier};
use crate::error::{HqError, Result};
use crate::hasher::{digest_512, file_digest_512, MESSAGE_DIGEST_LEN};
use crate::identity::{Identity, Keystore, Owner, PublicIdentity};
use crate::map::{clean_maps, container_path, find_map, EXECUTABLE_EXT};
use crate::sign::build_map;
use crate::types::{EventCallback, FileVerifyReport, SignReport, VerifyReport};
use crate::verify::verify_tree;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Entry point for sign and verify operations
pub struct Hq {
    config: HqConfig,
    reviewer: Arc<dyn CodeReviewer>,
}

impl std::fmt::Debug for Hq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hq").field("config", &self.config).finish()
    }
}

impl Hq {
    /// Build an instance from an explicit configuration
    pub fn with_config(config: HqConfig, reviewer: Arc<dyn CodeReviewer>) -> Self {
        Self { config, reviewer }
    }

    /// Active configuration
    pub fn config(&self) -> &HqConfig {
        &self.config
    }

    /// Public keystore
    pub fn keystore(&self) -> Keystore {
        Keystore::new(&self.config.keystore)
    }

    /// Create an identity and store its public key
    ///
    /// With `make_default`, the keystore's `me` link points at the new tag.
    #[instrument(skip(self, pass_one, pass_two))]
    pub fn generate(
        &self,
        owner: Owner,
        pass_one: &[u8],
        pass_two: &[u8],
        make_default: bool,
    ) -> Result<PublicIdentity> {
        let identity = Identity::unlock(owner, pass_one, pass_two);
        let keystore = self.keystore();
        keystore.save(identity.public())?;
        if make_default {
            keystore.set_default(identity.tag())?;
        }
        info!("Generated identity {}", identity.tag());
        Ok(identity.public().clone())
    }

    /// Map a directory and, given an identity, sign the map
    ///
    /// Without an identity, or in map-only mode, only the map is written.
    ///
    /// # Errors
    ///
    /// - [`HqError::FatalIo`] if the directory cannot be read or the map or
    ///   container cannot be durably written
    #[instrument(skip(self, identity))]
    pub fn dir_sign(&self, dir: &Path, identity: Option<&Identity>) -> Result<SignReport> {
        let start = Instant::now();
        let ts = Utc::now().timestamp();
        info!("Signing {:?}", dir);

        let reviewer = self.config.code_review.then(|| &*self.reviewer);
        let map = build_map(dir, &self.config, reviewer, ts)?;

        let signer = identity.filter(|_| !self.config.map_only);
        let container = match signer {
            Some(identity) => {
                let path = container_path(&map.path);
                let digest = digest_512(&map.compressed);
                self.seal(identity, ts, &digest, None)?.write_to(&path)?;
                info!("Sealed map with {}", identity.tag());
                Some(path)
            }
            None => {
                debug!("Map-only run, no container written");
                None
            }
        };

        if self.config.map_clean {
            let removed = clean_maps(dir, &map.path)?;
            debug!("Removed {} old map artifacts", removed);
        }

        Ok(SignReport {
            dir: dir.to_path_buf(),
            map_bytes: map.compressed.len() as u64,
            map_path: map.path,
            container_path: container,
            tag: signer.map(|i| i.tag().to_string()),
            files_total: map.records,
            timestamp: ts,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Verify a directory against its newest map
    pub fn dir_verify(&self, dir: &Path) -> Result<VerifyReport> {
        self.dir_verify_with_events(dir, None)
    }

    /// Verify a directory, streaming events to `events` as they happen
    ///
    /// Content failures never make this return `Err`; they are counted in
    /// the report. The container signature is checked independently and
    /// reported in [`VerifyReport::signature_valid`].
    ///
    /// # Errors
    ///
    /// - [`HqError::MapNotFound`] if the directory holds no matching map
    /// - [`HqError::FatalFormat`] if the container is malformed
    /// - [`HqError::Decompression`] if the map is not a zstd stream
    #[instrument(skip(self, events))]
    pub fn dir_verify_with_events(
        &self,
        dir: &Path,
        events: Option<EventCallback>,
    ) -> Result<VerifyReport> {
        let start = Instant::now();
        let map_path = find_map(dir, self.config.target_timestamp.as_deref())?;
        info!("Verifying {:?} against {:?}", dir, map_path);

        let compressed = fs::read(&map_path).map_err(|e| HqError::fatal_io(&map_path, e))?;

        let sealed = container_path(&map_path);
        let (tag, timestamp, signature_valid) = if sealed.exists() {
            let container = Container::load(&sealed, self.signature_len())?;
            let valid = self.check_seal(&container, &digest_512(&compressed), None);
            (
                Some(container.tag().to_string()),
                Some(container.timestamp()),
                Some(valid),
            )
        } else {
            warn!("No container for {:?}, signature not checked", map_path);
            (None, None, None)
        };

        let map = CompressionEngine::new().decompress(&compressed)?;
        let outcome = verify_tree(
            dir,
            &map,
            &self.config,
            Some(&*self.reviewer),
            events,
        )?;

        Ok(VerifyReport {
            dir: dir.to_path_buf(),
            map_path,
            tag,
            timestamp,
            files_total: outcome.files_total,
            files_fail: outcome.files_fail(),
            files_new: outcome.new_files.len() as u64,
            failures: outcome.failures,
            new_files: outcome.new_files,
            corruption: outcome.corruption.map(|e| e.to_string()),
            signature_valid,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Sign one file into `<file>.hqs`
    #[instrument(skip(self, identity))]
    pub fn file_sign(&self, file: &Path, identity: &Identity) -> Result<PathBuf> {
        let ts = Utc::now().timestamp();
        let digest = file_digest_512(file)?;
        let path = container_path(file);
        self.seal(identity, ts, &digest, None)?.write_to(&path)?;
        info!("Signed {:?} as {}", file, identity.tag());
        Ok(path)
    }

    /// Check `<file>.hqs` against `file`
    #[instrument(skip(self))]
    pub fn file_verify(&self, file: &Path) -> Result<FileVerifyReport> {
        let sealed = container_path(file);
        let container = Container::load(&sealed, self.signature_len())?;
        let digest = file_digest_512(file)?;
        self.report(sealed, &container, &digest, None)
    }

    /// Pack a script into a signed `<script>.hqx`
    ///
    /// # Errors
    ///
    /// - [`HqError::FatalFormat`] if no interpreter matches the script
    #[instrument(skip(self, identity))]
    pub fn file_sign_executable(&self, script: &Path, identity: &Identity) -> Result<PathBuf> {
        let source = fs::read(script).map_err(|e| HqError::fatal_io(script, e))?;
        let interpreter = Interpreter::detect(script, &source).ok_or_else(|| {
            HqError::fatal_format(format!("no known interpreter for {:?}", script))
        })?;
        let payload = CompressionEngine::new().compress(&source, self.config.script_level)?;

        let ts = Utc::now().timestamp();
        let sealed = self.seal(identity, ts, &digest_512(&source), Some(&payload))?;
        let container = Container::executable(
            interpreter,
            sealed.tag().clone(),
            ts,
            sealed.signature_bytes().to_vec(),
            payload,
        );

        let mut name = script.as_os_str().to_os_string();
        name.push(EXECUTABLE_EXT);
        let path = PathBuf::from(name);
        container.write_to(&path)?;
        info!("Packed {:?} for {}", script, interpreter.program());
        Ok(path)
    }

    /// Check a `.hqx` from any reader and recover its script
    ///
    /// The script is returned in [`FileVerifyReport::script`] only when the
    /// signature is valid.
    pub fn verify_executable<R: std::io::Read>(
        &self,
        source: PathBuf,
        reader: R,
    ) -> Result<FileVerifyReport> {
        let container = Container::read_from(reader, self.signature_len())?;
        if !matches!(container.kind(), ContainerKind::Executable(_)) {
            return Err(HqError::fatal_format("expected an executable container"));
        }
        let script = CompressionEngine::new().decompress(container.payload())?;
        let mut report = self.report(source, &container, &digest_512(&script), Some(container.payload()))?;
        if report.signature_valid {
            report.script = Some(script);
        }
        Ok(report)
    }

    fn signature_len(&self) -> usize {
        crate::crypto::ED25519_SIGNATURE_LEN
    }

    fn seal(
        &self,
        identity: &Identity,
        ts: i64,
        digest: &[u8; MESSAGE_DIGEST_LEN],
        payload: Option<&[u8]>,
    ) -> Result<Container> {
        let ts_field = crate::container::timestamp_field(ts);
        let message = signed_message(identity.owner(), identity.tag(), &ts_field, digest, payload);
        Ok(Container::signature(
            identity.tag().clone(),
            ts,
            identity.sign(&message),
        ))
    }

    /// Whether `container` carries a valid signature over `digest`
    ///
    /// Key lookup problems are logged and count as an invalid signature.
    fn check_seal(
        &self,
        container: &Container,
        digest: &[u8; MESSAGE_DIGEST_LEN],
        payload: Option<&[u8]>,
    ) -> bool {
        match self.open_seal(container, digest, payload) {
            Ok((_, valid)) => valid,
            Err(e) => {
                warn!("Signature not verifiable: {}", e);
                false
            }
        }
    }

    fn open_seal(
        &self,
        container: &Container,
        digest: &[u8; MESSAGE_DIGEST_LEN],
        payload: Option<&[u8]>,
    ) -> Result<(PublicIdentity, bool)> {
        let public = self.keystore().load(container.tag())?;
        let verifier = Ed25519Verifier::from_public_key(&public.public_key)?;
        let message = signed_message(
            &public.owner,
            &public.tag,
            &container.timestamp_field(),
            digest,
            payload,
        );
        let valid = verifier.verify(&message, container.signature_bytes());
        if !valid {
            warn!("Invalid signature for {}", public.tag);
        }
        Ok((public, valid))
    }

    fn report(
        &self,
        source: PathBuf,
        container: &Container,
        digest: &[u8; MESSAGE_DIGEST_LEN],
        payload: Option<&[u8]>,
    ) -> Result<FileVerifyReport> {
        let (public, valid) = self.open_seal(container, digest, payload)?;
        Ok(FileVerifyReport {
            container: source,
            tag: public.tag.to_string(),
            owner: public.owner.id(),
            timestamp: container.timestamp(),
            signature_valid: valid,
            interpreter: match container.kind() {
                ContainerKind::Executable(i) => Some(i.token().to_string()),
                ContainerKind::Signature => None,
            },
            script: None,
        })
    }
}
