//! Pinned companion identity.
//!
//! The pinned identity is the trust anchor for every handshake. It is
//! stored as a single record and treated as absent unless every field is
//! present and well-formed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol::{decode_key32, encode_b64};
use crate::store::{load_record, save_record, KeyValueStore, StoreError};

/// Store key of the pairing record.
pub const PAIRING_KEY: &str = "pairing";

/// The trusted companion identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedPeerIdentity {
    pub fingerprint: String,
    pub signing_public_key: [u8; 32],
    pub exchange_public_key: [u8; 32],
}

/// Persisted form of the pairing state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub signing_public_key: Option<String>,
    #[serde(default)]
    pub exchange_public_key: Option<String>,
    #[serde(default)]
    pub paired: bool,
}

impl PairingRecord {
    /// The pinned identity, if and only if the record is complete.
    pub fn to_identity(&self) -> Option<PinnedPeerIdentity> {
        if !self.paired {
            return None;
        }
        let fingerprint = self.fingerprint.as_deref().filter(|f| !f.is_empty())?;
        let signing_public_key = decode_key32(self.signing_public_key.as_deref()?)?;
        let exchange_public_key = decode_key32(self.exchange_public_key.as_deref()?)?;
        Some(PinnedPeerIdentity {
            fingerprint: fingerprint.to_owned(),
            signing_public_key,
            exchange_public_key,
        })
    }
}

impl From<&PinnedPeerIdentity> for PairingRecord {
    fn from(identity: &PinnedPeerIdentity) -> Self {
        Self {
            fingerprint: Some(identity.fingerprint.clone()),
            signing_public_key: Some(encode_b64(&identity.signing_public_key)),
            exchange_public_key: Some(encode_b64(&identity.exchange_public_key)),
            paired: true,
        }
    }
}

/// Reads and writes the pinned identity as a unit.
#[derive(Clone)]
pub struct PairingStore {
    store: Arc<dyn KeyValueStore>,
}

impl PairingStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<PinnedPeerIdentity>, StoreError> {
        let record: Option<PairingRecord> = load_record(self.store.as_ref(), PAIRING_KEY).await?;
        Ok(record.and_then(|r| r.to_identity()))
    }

    pub async fn save(&self, identity: &PinnedPeerIdentity) -> Result<(), StoreError> {
        save_record(
            self.store.as_ref(),
            PAIRING_KEY,
            &PairingRecord::from(identity),
        )
        .await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(PAIRING_KEY).await
    }

    pub async fn is_paired(&self) -> Result<bool, StoreError> {
        Ok(self.load().await?.is_some())
    }
}
