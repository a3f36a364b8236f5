//! Session key derivation and payload encryption.
//!
//! The session key is `SHA-256(shared || transcript)` truncated to the
//! ChaCha20-Poly1305 key length. Every sealed payload gets a fresh random
//! 12-byte nonce, sent next to the ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// ChaCha20-Poly1305 key length.
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 12;

/// Error type for session crypto operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionCryptoError {
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("invalid nonce length: {0}")]
    InvalidNonce(usize),
    #[error("RNG failed")]
    RngError,
}

/// Symmetric session key. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; KEY_LEN]>);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derive the session key from the X25519 shared secret and the begin transcript.
pub fn derive_session_key(shared: &[u8], transcript: &[u8]) -> SessionKey {
    let mut h = Sha256::new();
    h.update(shared);
    h.update(transcript);
    let digest = h.finalize();

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    SessionKey::from_bytes(key)
}

/// AEAD cipher bound to one session key.
pub struct SessionCipher {
    aead: ChaCha20Poly1305,
}

impl SessionCipher {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt under a fresh random nonce. Returns `(nonce, ciphertext+tag)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), SessionCryptoError> {
        let nonce: [u8; NONCE_LEN] =
            crate::random_array().map_err(|_| SessionCryptoError::RngError)?;
        let ct = self.seal_with_nonce(&nonce, plaintext)?;
        Ok((nonce, ct))
    }

    /// Encrypt under a caller-supplied nonce.
    pub fn seal_with_nonce(
        &self,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SessionCryptoError> {
        self.aead
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| SessionCryptoError::EncryptionFailed)
    }

    /// Decrypt. The nonce must be exactly 12 bytes.
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SessionCryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(SessionCryptoError::InvalidNonce(nonce.len()));
        }
        self.aead
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionCryptoError::DecryptionFailed)
    }
}
