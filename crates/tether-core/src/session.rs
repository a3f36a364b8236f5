//! In-memory session and handshake state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tether_crypto::exchange::EphemeralKeyPair;
use tether_crypto::session_crypto::{SessionCipher, SessionCryptoError, SessionKey, NONCE_LEN};

/// An established (or confirming) secure session.
///
/// The key lives only here and is zeroized when the last reference drops.
pub struct Session {
    id: String,
    key: SessionKey,
    sequence: AtomicU64,
    peer_ephemeral_public_key_encoded: String,
    active: AtomicBool,
}

impl Session {
    /// A new session waiting for the finish step to confirm it.
    pub fn new(id: String, key: SessionKey, peer_ephemeral_public_key_encoded: String) -> Self {
        Self {
            id,
            key,
            sequence: AtomicU64::new(0),
            peer_ephemeral_public_key_encoded,
            active: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_ephemeral_public_key_encoded(&self) -> &str {
        &self.peer_ephemeral_public_key_encoded
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Claim the next sequence number. The first call returns 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last sequence number handed out.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), SessionCryptoError> {
        SessionCipher::new(&self.key).seal(plaintext)
    }

    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SessionCryptoError> {
        SessionCipher::new(&self.key).open(nonce, ciphertext)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("sequence", &self.sequence())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Ephemeral state of one handshake attempt.
#[derive(Debug)]
pub struct HandshakeState {
    ephemeral: EphemeralKeyPair,
    peer_ephemeral: Option<[u8; 32]>,
    session_id: Option<String>,
}

impl HandshakeState {
    pub fn new(ephemeral: EphemeralKeyPair) -> Self {
        Self {
            ephemeral,
            peer_ephemeral: None,
            session_id: None,
        }
    }

    pub fn ephemeral(&self) -> &EphemeralKeyPair {
        &self.ephemeral
    }

    /// Record what the companion answered to the begin step.
    pub fn record_begin(&mut self, session_id: String, peer_ephemeral: [u8; 32]) {
        self.session_id = Some(session_id);
        self.peer_ephemeral = Some(peer_ephemeral);
    }

    /// `(session_id, peer_eph, own_eph)` once the begin step succeeded.
    pub fn finish_inputs(&self) -> Option<(String, [u8; 32], [u8; 32])> {
        if self.ephemeral.is_wiped() {
            return None;
        }
        Some((
            self.session_id.clone()?,
            self.peer_ephemeral?,
            self.ephemeral.public_key(),
        ))
    }

    pub fn wipe(&mut self) {
        self.ephemeral.wipe();
    }
}

impl Drop for HandshakeState {
    fn drop(&mut self) {
        self.wipe();
    }
}
