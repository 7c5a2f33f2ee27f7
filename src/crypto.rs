//! Signing primitives
//!
//! The rest of the crate talks to signatures only through [`Signer`] and
//! [`Verifier`]. The shipped backend is Ed25519 (`ed25519-dalek`).
//!
//! ## Signed message
//!
//! A container signature never covers the raw file. It covers a 512-bit
//! BLAKE3 digest of
//!
//! ```text
//! owner[64] '#' tag[30] '#' timestamp[10] '#' file digest[64] '#' [payload]
//! ```
//!
//! which binds the identity, the time and the content together. See
//! [`signed_message`].

use crate::error::{HqError, Result};
use crate::hasher::{blake3_512, MESSAGE_DIGEST_LEN};
use crate::identity::{Owner, Tag};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

/// Ed25519 signature length
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// Ed25519 public key length
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

const DELIMITER: u8 = b'#';

/// Produces signatures
pub trait Signer: Send + Sync {
    /// Raw public key bytes
    fn public_key(&self) -> Vec<u8>;

    /// Sign `message`
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Checks signatures for one public key
pub trait Verifier: Send + Sync {
    /// Length of a signature in bytes
    fn signature_len(&self) -> usize;

    /// Whether `signature` is valid for `message`
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519 signer
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Create a signer from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

/// Ed25519 verifier
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    verifying_key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Create a verifier from raw public key bytes
    ///
    /// # Errors
    ///
    /// - [`HqError::Signature`] if the key has the wrong length or is not a
    ///   valid curve point
    pub fn from_public_key(public_key: &[u8]) -> Result<Self> {
        let bytes: [u8; ED25519_PUBLIC_KEY_LEN] = public_key.try_into().map_err(|_| {
            HqError::Signature(format!(
                "Ed25519 public key must be {} bytes, got {}",
                ED25519_PUBLIC_KEY_LEN,
                public_key.len()
            ))
        })?;
        let verifying_key =
            VerifyingKey::from_bytes(&bytes).map_err(|e| HqError::Signature(e.to_string()))?;
        Ok(Self { verifying_key })
    }
}

impl Verifier for Ed25519Verifier {
    fn signature_len(&self) -> usize {
        ED25519_SIGNATURE_LEN
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; ED25519_SIGNATURE_LEN]>::try_from(signature) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        self.verifying_key.verify(message, &signature).is_ok()
    }
}

/// Digest that a container signature covers
pub fn signed_message(
    owner: &Owner,
    tag: &Tag,
    timestamp: &str,
    file_digest: &[u8; MESSAGE_DIGEST_LEN],
    payload: Option<&[u8]>,
) -> [u8; MESSAGE_DIGEST_LEN] {
    let payload = payload.unwrap_or_default();
    let mut message = Vec::with_capacity(64 + 30 + 10 + MESSAGE_DIGEST_LEN + 4 + payload.len());
    message.extend_from_slice(owner.as_bytes());
    message.push(DELIMITER);
    message.extend_from_slice(tag.as_str().as_bytes());
    message.push(DELIMITER);
    message.extend_from_slice(timestamp.as_bytes());
    message.push(DELIMITER);
    message.extend_from_slice(file_digest);
    message.push(DELIMITER);
    message.extend_from_slice(payload);
    blake3_512(&message)
}
