//! Ephemeral X25519 key agreement used once per handshake.

use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of an X25519 public key.
pub const EXCHANGE_KEY_LEN: usize = 32;

/// Error type for key agreement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("ephemeral key already wiped")]
    Wiped,
    #[error("peer public key produced a non-contributory shared secret")]
    NonContributory,
}

/// An ephemeral X25519 keypair.
///
/// `StaticSecret` is used instead of `EphemeralSecret` because the key
/// has to survive across two round-trips (begin and finish). The secret
/// zeroizes on drop; `wipe` drops it early.
pub struct EphemeralKeyPair {
    secret: Option<StaticSecret>,
    public: [u8; EXCHANGE_KEY_LEN],
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self {
            secret: Some(secret),
            public,
        }
    }

    pub fn public_key(&self) -> [u8; EXCHANGE_KEY_LEN] {
        self.public
    }

    /// Compute the shared secret with a peer public key.
    pub fn diffie_hellman(
        &self,
        peer_public: &[u8; EXCHANGE_KEY_LEN],
    ) -> Result<Zeroizing<[u8; 32]>, ExchangeError> {
        let secret = self.secret.as_ref().ok_or(ExchangeError::Wiped)?;
        let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(ExchangeError::NonContributory);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }

    /// Drop the private half now instead of waiting for the value to go out of scope.
    pub fn wipe(&mut self) {
        self.secret = None;
    }

    pub fn is_wiped(&self) -> bool {
        self.secret.is_none()
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(self.public))
            .field("wiped", &self.is_wiped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();

        let ab = a.diffie_hellman(&b.public_key()).unwrap();
        let ba = b.diffie_hellman(&a.public_key()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_wiped_key_refuses_agreement() {
        let mut a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        a.wipe();

        assert!(a.is_wiped());
        assert_eq!(
            a.diffie_hellman(&b.public_key()).unwrap_err(),
            ExchangeError::Wiped
        );
    }

    #[test]
    fn test_low_order_point_rejected() {
        let a = EphemeralKeyPair::generate();
        assert_eq!(
            a.diffie_hellman(&[0u8; 32]).unwrap_err(),
            ExchangeError::NonContributory
        );
    }
}
