//! Long-term client signing identity.
//!
//! The client holds exactly one Ed25519 keypair. The private half only
//! ever exists in memory; the signing key zeroizes itself on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::hash::short_fingerprint;

/// Length of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 secret key seed.
pub const SECRET_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Error type for identity operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// The client's long-term signing keypair.
#[derive(Clone)]
pub struct SigningIdentity {
    sign_key: SigningKey,
}

impl SigningIdentity {
    /// Generate a new random identity using the OS RNG.
    pub fn generate() -> Self {
        Self {
            sign_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild an identity from its 32-byte secret seed.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, IdentityError> {
        let seed: [u8; SECRET_KEY_LEN] =
            secret
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyLength {
                    expected: SECRET_KEY_LEN,
                    got: secret.len(),
                })?;
        let seed = Zeroizing::new(seed);
        Ok(Self {
            sign_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.sign_key.verifying_key().to_bytes()
    }

    /// Secret seed, wrapped so the copy is wiped when dropped.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.sign_key.to_bytes())
    }

    /// Sign a message. Returns a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }

    /// Log-safe fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        short_fingerprint(&self.public_key())
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Convert a byte slice into a fixed 32-byte key.
pub fn key_from_slice(bytes: &[u8]) -> Result<[u8; 32], IdentityError> {
    bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyLength {
            expected: 32,
            got: bytes.len(),
        })
}

/// Verify an Ed25519 signature.
///
/// # Arguments
/// * `pub_key` - The signer's Ed25519 public key (32 bytes)
/// * `message` - The message that was signed
/// * `signature` - The Ed25519 signature; anything but 64 bytes is rejected
pub fn verify_signature(
    pub_key: &[u8; PUBLIC_KEY_LEN],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let signature: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| IdentityError::InvalidSignature)?;
    let verifying_key =
        VerifyingKey::from_bytes(pub_key).map_err(|_| IdentityError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(&signature);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| IdentityError::InvalidSignature)
}
