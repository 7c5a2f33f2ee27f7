//! Identities, tags and the public keystore
//!
//! An identity is an owner id plus an Ed25519 key pair derived from a pair of
//! credentials. Its 30-character [`Tag`] is a pure function of the padded
//! owner id and the public key:
//!
//! ```text
//! base32(SHA3-256(SHA-512(owner[64] || public key)))
//!   -> XXXXXX-XX-XXXXXX-XX-XXXXXXXXXX
//! ```
//!
//! ## Keystore layout
//!
//! ```text
//! <keystore>/
//! ├── <tag>      owner[64] followed by base64(public key)
//! └── me ─▶ <tag>   default identity
//! ```
//!
//! Loading a key re-derives the tag from the stored owner and key and refuses
//! a file whose content does not match its name.

use crate::crypto::{Ed25519Signer, Signer};
use crate::error::{HqError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use data_encoding::BASE32;
use sha2::{Digest, Sha512};
use sha3::{Sha3_256, Sha3_512};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Padded owner length
pub const OWNER_LEN: usize = 64;

/// Shortest accepted owner id
pub const OWNER_MIN_LEN: usize = 6;

/// Tag length including hyphens
pub const TAG_LEN: usize = 30;

/// Name of the default identity link in the keystore
pub const DEFAULT_LINK: &str = "me";

const OWNER_PAD: u8 = b'=';
const TAG_HYPHENS: [usize; 4] = [6, 9, 16, 19];
const SEED_DOMAIN: &[u8] = b"hq identity seed v1";

/// Owner id padded to 64 bytes with `=`
#[derive(Clone, PartialEq, Eq)]
pub struct Owner([u8; OWNER_LEN]);

impl Owner {
    /// Validate and pad an owner id
    ///
    /// # Errors
    ///
    /// - [`HqError::InvalidOwner`] if the id is shorter than 6 or longer
    ///   than 64 bytes, or contains `=`
    pub fn new(id: &str) -> Result<Self> {
        let bytes = id.as_bytes();
        if bytes.len() < OWNER_MIN_LEN || bytes.len() > OWNER_LEN {
            return Err(HqError::InvalidOwner(format!(
                "owner id has {} bytes",
                bytes.len()
            )));
        }
        if bytes.contains(&OWNER_PAD) {
            return Err(HqError::InvalidOwner("owner id contains '='".into()));
        }
        let mut padded = [OWNER_PAD; OWNER_LEN];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(padded))
    }

    /// Parse an already padded owner field
    pub fn from_padded(padded: &[u8]) -> Result<Self> {
        let end = padded
            .iter()
            .position(|&b| b == OWNER_PAD)
            .unwrap_or(padded.len());
        if padded.len() != OWNER_LEN || padded[end..].iter().any(|&b| b != OWNER_PAD) {
            return Err(HqError::InvalidOwner("malformed padded owner field".into()));
        }
        let id = std::str::from_utf8(&padded[..end])
            .map_err(|_| HqError::InvalidOwner("owner id is not UTF-8".into()))?;
        Self::new(id)
    }

    /// Padded bytes
    pub fn as_bytes(&self) -> &[u8; OWNER_LEN] {
        &self.0
    }

    /// Owner id without padding
    pub fn id(&self) -> String {
        let end = self
            .0
            .iter()
            .position(|&b| b == OWNER_PAD)
            .unwrap_or(OWNER_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owner").field(&self.id()).finish()
    }
}

/// 30-character identity tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    /// Derive the tag for an owner and public key
    pub fn derive(owner: &Owner, public_key: &[u8]) -> Self {
        let mut sha512 = Sha512::new();
        sha512.update(owner.as_bytes());
        sha512.update(public_key);
        let digest = Sha3_256::digest(sha512.finalize());
        let s = BASE32.encode(&digest);

        Self(format!(
            "{}-{}-{}-{}-{}",
            &s[0..6],
            &s[6..8],
            &s[8..14],
            &s[14..16],
            &s[16..26]
        ))
    }

    /// Parse a tag read from a container or the command line
    ///
    /// # Errors
    ///
    /// - [`HqError::InvalidTag`] unless `s` has the tag shape
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != TAG_LEN {
            return Err(HqError::InvalidTag(format!("expected {} bytes, got {}", TAG_LEN, bytes.len())));
        }
        for (i, &b) in bytes.iter().enumerate() {
            let ok = if TAG_HYPHENS.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b)
            };
            if !ok {
                return Err(HqError::InvalidTag(format!("unexpected byte at {} in {:?}", i, s)));
            }
        }
        Ok(Self(s.to_string()))
    }

    /// Tag text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the 32-byte signing seed from an owner and credential pair
pub fn derive_seed(owner: &Owner, pass_one: &[u8], pass_two: &[u8]) -> [u8; 32] {
    let owner_hash = Sha3_512::digest(owner.as_bytes());
    let one = Sha512::digest(pass_one);
    let two = Sha3_512::digest(pass_two);

    let mut hasher = Sha3_256::new();
    hasher.update(SEED_DOMAIN);
    hasher.update(owner_hash);
    hasher.update(one);
    hasher.update(two);
    hasher.finalize().into()
}

/// Public half of an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    /// Owner id
    pub owner: Owner,
    /// Tag derived from owner and key
    pub tag: Tag,
    /// Raw public key
    pub public_key: Vec<u8>,
}

impl PublicIdentity {
    /// Build from owner and key, deriving the tag
    pub fn new(owner: Owner, public_key: Vec<u8>) -> Self {
        let tag = Tag::derive(&owner, &public_key);
        Self {
            owner,
            tag,
            public_key,
        }
    }
}

/// Identity able to sign
pub struct Identity {
    public: PublicIdentity,
    signer: Box<dyn Signer>,
}

impl Identity {
    /// Re-derive an identity from its owner id and credentials
    pub fn unlock(owner: Owner, pass_one: &[u8], pass_two: &[u8]) -> Self {
        let seed = derive_seed(&owner, pass_one, pass_two);
        Self::from_signer(owner, Box::new(Ed25519Signer::from_seed(&seed)))
    }

    /// Wrap an arbitrary signer
    pub fn from_signer(owner: Owner, signer: Box<dyn Signer>) -> Self {
        let public = PublicIdentity::new(owner, signer.public_key());
        Self { public, signer }
    }

    /// Public half
    pub fn public(&self) -> &PublicIdentity {
        &self.public
    }

    /// Owner id
    pub fn owner(&self) -> &Owner {
        &self.public.owner
    }

    /// Tag
    pub fn tag(&self) -> &Tag {
        &self.public.tag
    }

    /// Sign a message digest
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signer.sign(message)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("owner", &self.public.owner)
            .field("tag", &self.public.tag)
            .finish()
    }
}

/// Directory of public keys filed by tag
#[derive(Debug, Clone)]
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Keystore rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Keystore directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, tag: &Tag) -> PathBuf {
        self.dir.join(tag.as_str())
    }

    /// Store a public key under its tag
    ///
    /// # Errors
    ///
    /// - [`HqError::FatalIo`] if the keystore cannot be written
    pub fn save(&self, identity: &PublicIdentity) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| HqError::fatal_io(&self.dir, e))?;
        let path = self.key_path(&identity.tag);

        let mut content = identity.owner.as_bytes().to_vec();
        content.extend_from_slice(STANDARD.encode(&identity.public_key).as_bytes());
        crate::utils::synced_write(&path, &content, 0o644)?;

        info!("Stored public key for {} ({})", identity.tag, identity.owner.id());
        Ok(path)
    }

    /// Load and check the public key filed under `tag`
    ///
    /// # Errors
    ///
    /// - [`HqError::KeyNotFound`] if there is no key for `tag`
    /// - [`HqError::KeyIntegrity`] if the stored key derives another tag
    pub fn load(&self, tag: &Tag) -> Result<PublicIdentity> {
        let path = self.key_path(tag);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HqError::KeyNotFound(tag.to_string()))
            }
            Err(e) => return Err(HqError::fatal_io(path, e)),
        };
        if content.len() <= OWNER_LEN {
            return Err(HqError::KeyIntegrity {
                expected: tag.to_string(),
                derived: String::new(),
            });
        }

        let owner = Owner::from_padded(&content[..OWNER_LEN])?;
        let encoded = String::from_utf8_lossy(&content[OWNER_LEN..]);
        let public_key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HqError::Signature(format!("stored key for {}: {}", tag, e)))?;

        let identity = PublicIdentity::new(owner, public_key);
        if identity.tag != *tag {
            return Err(HqError::KeyIntegrity {
                expected: tag.to_string(),
                derived: identity.tag.to_string(),
            });
        }
        debug!("Loaded key for {}", tag);
        Ok(identity)
    }

    /// Point the default identity link at `tag`
    #[cfg(unix)]
    pub fn set_default(&self, tag: &Tag) -> Result<()> {
        let link = self.dir.join(DEFAULT_LINK);
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link).map_err(|e| HqError::fatal_io(&link, e))?;
        }
        std::os::unix::fs::symlink(tag.as_str(), &link).map_err(|e| HqError::fatal_io(&link, e))
    }

    /// Point the default identity at `tag`
    #[cfg(not(unix))]
    pub fn set_default(&self, tag: &Tag) -> Result<()> {
        let link = self.dir.join(DEFAULT_LINK);
        fs::write(&link, tag.as_str()).map_err(|e| HqError::fatal_io(&link, e))
    }

    /// Tag of the default identity
    pub fn default_tag(&self) -> Result<Tag> {
        let link = self.dir.join(DEFAULT_LINK);
        let target = match fs::read_link(&link) {
            Ok(target) => target.to_string_lossy().into_owned(),
            Err(_) => fs::read_to_string(&link)
                .map_err(|_| HqError::KeyNotFound(DEFAULT_LINK.to_string()))?,
        };
        Tag::parse(target.trim())
    }
}
