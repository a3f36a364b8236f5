//! Sealing of secrets at rest.
//!
//! A 32-byte storage key is derived from the user secret and a random salt
//! with Argon2id, then the secret is encrypted with ChaCha20-Poly1305 under
//! a random nonce. Salt, nonce and ciphertext are stored; the key is not.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::session_crypto::{KEY_LEN, NONCE_LEN};

/// Salt length for the storage key derivation.
pub const SALT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SealError {
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("encryption failed")]
    EncryptionFailed,
    /// Wrong secret or tampered record; AEAD cannot tell the two apart.
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("invalid {field} length: {got}")]
    InvalidLength { field: &'static str, got: usize },
    #[error("RNG failed")]
    RngError,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// Minimum legal cost. Only meant for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST,
            iterations: Params::MIN_T_COST,
            parallelism: Params::MIN_P_COST,
        }
    }
}

/// Output of [`seal_secret`].
#[derive(Debug, Clone)]
pub struct SealedSecret {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Derive the storage key with Argon2id.
pub fn derive_storage_key(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, SealError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| SealError::Kdf(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| SealError::Kdf(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` under a key derived from `secret` with a fresh salt and nonce.
pub fn seal_secret(
    secret: &[u8],
    plaintext: &[u8],
    params: &KdfParams,
) -> Result<SealedSecret, SealError> {
    let salt: [u8; SALT_LEN] = crate::random_array().map_err(|_| SealError::RngError)?;
    let nonce: [u8; NONCE_LEN] = crate::random_array().map_err(|_| SealError::RngError)?;
    let key = derive_storage_key(secret, &salt, params)?;

    let aead = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = aead
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SealError::EncryptionFailed)?;

    Ok(SealedSecret {
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a sealed secret. The plaintext is returned wrapped for wiping.
pub fn open_secret(
    secret: &[u8],
    salt: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, SealError> {
    if salt.len() != SALT_LEN {
        return Err(SealError::InvalidLength {
            field: "salt",
            got: salt.len(),
        });
    }
    if nonce.len() != NONCE_LEN {
        return Err(SealError::InvalidLength {
            field: "nonce",
            got: nonce.len(),
        });
    }

    let key = derive_storage_key(secret, salt, params)?;
    let aead = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    aead.decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| SealError::AuthenticationFailed)
}
