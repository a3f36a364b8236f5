//! The client's long-term identity, encrypted at rest.
//!
//! Lifecycle: a keypair is generated in memory for pairing (the *pending*
//! keypair), persisted encrypted under the user secret on first unlock,
//! and afterwards unlocked from the stored record. `clear` forgets it all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use tether_crypto::identity::SigningIdentity;
use tether_crypto::sealed::{open_secret, seal_secret, KdfParams, SealError};

use crate::errors::{AuthError, ChannelError, IdentityError};
use crate::protocol::{decode_b64, decode_key32, encode_b64};
use crate::store::{load_record, save_record, KeyValueStore};

/// Store key of the encrypted identity record.
pub const IDENTITY_KEY: &str = "client-identity";

/// Persisted identity. The private key only appears as ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub public_key: String,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub kdf: KdfParams,
}

/// Clears the unlock flag on every exit path.
struct UnlockGuard<'a>(&'a AtomicBool);

impl<'a> UnlockGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
    kdf: KdfParams,
    unlocked: Mutex<Option<SigningIdentity>>,
    pending: Mutex<Option<SigningIdentity>>,
    unlocking: AtomicBool,
    /// Serializes "is there a record" checks with record creation.
    records: tokio::sync::Mutex<()>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>, kdf: KdfParams) -> Self {
        Self {
            store,
            kdf,
            unlocked: Mutex::new(None),
            pending: Mutex::new(None),
            unlocking: AtomicBool::new(false),
            records: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Option<StoredIdentity>, IdentityError> {
        Ok(load_record(self.store.as_ref(), IDENTITY_KEY).await?)
    }

    /// Public key to present during pairing. Never needs the secret.
    pub async fn ensure_generated_for_pairing(&self) -> Result<[u8; 32], IdentityError> {
        if let Some(identity) = self.unlocked.lock().as_ref() {
            return Ok(identity.public_key());
        }
        let _records = self.records.lock().await;
        if let Some(identity) = self.pending.lock().as_ref() {
            return Ok(identity.public_key());
        }
        if let Some(record) = self.load().await? {
            return decode_key32(&record.public_key)
                .ok_or_else(|| IdentityError::Crypto("stored public key is malformed".into()));
        }

        let mut pending = self.pending.lock();
        let identity = pending.get_or_insert_with(|| {
            let identity = SigningIdentity::generate();
            debug!(fingerprint = %identity.fingerprint(), "Generated pending client identity");
            identity
        });
        Ok(identity.public_key())
    }

    /// The full keypair, unlocking or creating the stored record as needed.
    pub async fn ensure_unlocked(&self, secret: &str) -> Result<SigningIdentity, ChannelError> {
        if let Some(identity) = self.unlocked.lock().clone() {
            return Ok(identity);
        }
        if secret.is_empty() {
            return Err(AuthError::SecretRequired.into());
        }
        let _guard = UnlockGuard::acquire(&self.unlocking).ok_or(IdentityError::UnlockInProgress)?;

        let identity = match self.load().await? {
            Some(record) => self.open_record(record, secret).await?,
            None => self.create_record(secret).await?,
        };

        *self.unlocked.lock() = Some(identity.clone());
        self.pending.lock().take();
        info!(fingerprint = %identity.fingerprint(), "Client identity unlocked");
        Ok(identity)
    }

    async fn open_record(
        &self,
        record: StoredIdentity,
        secret: &str,
    ) -> Result<SigningIdentity, ChannelError> {
        let malformed = |field: &str| IdentityError::Crypto(format!("stored {field} is malformed"));
        let public_key = decode_key32(&record.public_key).ok_or_else(|| malformed("public key"))?;
        let salt = decode_b64(&record.salt).map_err(|_| malformed("salt"))?;
        let nonce = decode_b64(&record.nonce).map_err(|_| malformed("nonce"))?;
        let ciphertext = decode_b64(&record.ciphertext).map_err(|_| malformed("ciphertext"))?;

        let secret = Zeroizing::new(secret.as_bytes().to_vec());
        let kdf = record.kdf;
        let opened = tokio::task::spawn_blocking(move || {
            open_secret(&secret, &salt, &nonce, &ciphertext, &kdf)
        })
        .await
        .map_err(|e| IdentityError::Crypto(e.to_string()))?;

        let seed = match opened {
            Ok(seed) => seed,
            Err(SealError::AuthenticationFailed) => return Err(AuthError::SecretInvalid.into()),
            Err(e) => return Err(IdentityError::Crypto(e.to_string()).into()),
        };

        let identity =
            SigningIdentity::from_secret_bytes(&seed).map_err(|_| AuthError::SecretInvalid)?;
        if identity.public_key() != public_key {
            return Err(AuthError::SecretInvalid.into());
        }
        Ok(identity)
    }

    async fn create_record(&self, secret: &str) -> Result<SigningIdentity, ChannelError> {
        let _records = self.records.lock().await;
        let identity = self
            .pending
            .lock()
            .clone()
            .unwrap_or_else(SigningIdentity::generate);

        let seed = identity.secret_bytes();
        let secret = Zeroizing::new(secret.as_bytes().to_vec());
        let kdf = self.kdf;
        let sealed = tokio::task::spawn_blocking(move || seal_secret(&secret, &seed[..], &kdf))
            .await
            .map_err(|e| IdentityError::Crypto(e.to_string()))?
            .map_err(|e| IdentityError::Crypto(e.to_string()))?;

        let record = StoredIdentity {
            public_key: encode_b64(&identity.public_key()),
            salt: encode_b64(&sealed.salt),
            nonce: encode_b64(&sealed.nonce),
            ciphertext: encode_b64(&sealed.ciphertext),
            created_at: Utc::now(),
            kdf,
        };
        save_record(self.store.as_ref(), IDENTITY_KEY, &record)
            .await
            .map_err(IdentityError::from)?;

        info!(fingerprint = %identity.fingerprint(), "Client identity created");
        Ok(identity)
    }

    /// The unlocked keypair, if any.
    pub fn unlocked(&self) -> Option<SigningIdentity> {
        self.unlocked.lock().clone()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.lock().is_some()
    }

    /// Public key of the unlocked, pending or persisted identity, in that order.
    pub async fn public_key(&self) -> Result<Option<[u8; 32]>, IdentityError> {
        if let Some(identity) = self.unlocked.lock().as_ref() {
            return Ok(Some(identity.public_key()));
        }
        if let Some(identity) = self.pending.lock().as_ref() {
            return Ok(Some(identity.public_key()));
        }
        Ok(self
            .load()
            .await?
            .and_then(|record| decode_key32(&record.public_key)))
    }

    /// Forget the unlocked keypair but keep the record.
    pub fn lock(&self) {
        if self.unlocked.lock().take().is_some() {
            debug!("Client identity locked");
        }
    }

    /// Delete the record and every in-memory copy.
    pub async fn clear(&self) -> Result<(), IdentityError> {
        self.unlocked.lock().take();
        self.pending.lock().take();
        self.store.remove(IDENTITY_KEY).await?;
        info!("Client identity cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn fast_store() -> (Arc<MemoryStore>, IdentityStore) {
        let backing = Arc::new(MemoryStore::new());
        let store = IdentityStore::new(backing.clone(), KdfParams::insecure_fast());
        (backing, store)
    }

    #[tokio::test]
    async fn test_pending_key_is_stable_and_persisted_on_unlock() {
        let (backing, store) = fast_store();

        let first = store.ensure_generated_for_pairing().await.unwrap();
        let second = store.ensure_generated_for_pairing().await.unwrap();
        assert_eq!(first, second);
        assert!(backing.get(IDENTITY_KEY).await.unwrap().is_none());

        let identity = store.ensure_unlocked("correct horse").await.unwrap();
        assert_eq!(identity.public_key(), first);
        assert!(backing.get(IDENTITY_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_never_holds_plaintext_seed() {
        let (backing, store) = fast_store();
        let identity = store.ensure_unlocked("pw").await.unwrap();

        let raw = backing.get(IDENTITY_KEY).await.unwrap().unwrap().to_string();
        assert!(!raw.contains(&encode_b64(&identity.secret_bytes()[..])));
    }

    #[tokio::test]
    async fn test_reopen_with_same_secret() {
        let (backing, store) = fast_store();
        let created = store.ensure_unlocked("pw").await.unwrap();

        let reopened = IdentityStore::new(backing, KdfParams::insecure_fast());
        let unlocked = reopened.ensure_unlocked("pw").await.unwrap();
        assert_eq!(created.public_key(), unlocked.public_key());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_secret_invalid() {
        let (backing, store) = fast_store();
        store.ensure_unlocked("right").await.unwrap();

        let reopened = IdentityStore::new(backing, KdfParams::insecure_fast());
        assert_eq!(
            reopened.ensure_unlocked("wrong").await.unwrap_err(),
            ChannelError::Auth(AuthError::SecretInvalid)
        );
        assert!(!reopened.is_unlocked());
    }

    #[tokio::test]
    async fn test_empty_secret_is_secret_required() {
        let (_, store) = fast_store();
        assert_eq!(
            store.ensure_unlocked("").await.unwrap_err(),
            ChannelError::Auth(AuthError::SecretRequired)
        );
    }

    #[tokio::test]
    async fn test_unlocked_store_ignores_secret() {
        let (_, store) = fast_store();
        let identity = store.ensure_unlocked("pw").await.unwrap();
        let again = store.ensure_unlocked("").await.unwrap();
        assert_eq!(identity.public_key(), again.public_key());
    }

    #[tokio::test]
    async fn test_concurrent_pairing_and_unlock_agree_on_key() {
        let (backing, store) = fast_store();

        let (a, b, unlocked) = tokio::join!(
            store.ensure_generated_for_pairing(),
            store.ensure_generated_for_pairing(),
            store.ensure_unlocked("pw")
        );
        let unlocked = unlocked.unwrap().public_key();
        assert_eq!(a.unwrap(), unlocked);
        assert_eq!(b.unwrap(), unlocked);

        let reopened = IdentityStore::new(backing, KdfParams::insecure_fast());
        assert_eq!(reopened.public_key().await.unwrap(), Some(unlocked));
    }

    #[tokio::test]
    async fn test_concurrent_unlock_is_rejected() {
        let store = IdentityStore::new(Arc::new(MemoryStore::new()), KdfParams::default());

        let (a, b) = tokio::join!(store.ensure_unlocked("pw"), store.ensure_unlocked("pw"));
        assert!(a.is_ok());
        assert_eq!(
            b.unwrap_err(),
            ChannelError::Identity(IdentityError::UnlockInProgress)
        );

        // The flag is released afterwards.
        store.lock();
        assert!(store.ensure_unlocked("pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_flag_released_after_failure() {
        let (backing, store) = fast_store();
        store.ensure_unlocked("right").await.unwrap();

        let reopened = IdentityStore::new(backing, KdfParams::insecure_fast());
        assert!(reopened.ensure_unlocked("wrong").await.is_err());
        assert!(reopened.ensure_unlocked("right").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let (backing, store) = fast_store();
        store.ensure_unlocked("pw").await.unwrap();
        store.clear().await.unwrap();

        assert!(!store.is_unlocked());
        assert!(backing.get(IDENTITY_KEY).await.unwrap().is_none());
        assert_eq!(store.public_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_public_key_reads_persisted_record() {
        let (backing, store) = fast_store();
        let identity = store.ensure_unlocked("pw").await.unwrap();

        let fresh = IdentityStore::new(backing, KdfParams::insecure_fast());
        assert_eq!(
            fresh.public_key().await.unwrap(),
            Some(identity.public_key())
        );
        assert_eq!(
            fresh.ensure_generated_for_pairing().await.unwrap(),
            identity.public_key()
        );
    }
}
