//! Pairing, handshake and secure session state machine.
//!
//! The channel pins the companion's identity during pairing, runs a signed
//! ephemeral X25519 handshake against that pin, and then carries
//! ChaCha20-Poly1305 encrypted requests. Failures are classified: session
//! level failures get one re-handshake and retry, identity level failures
//! clear pairing, and user-fixable failures are surfaced untouched.
//!
//! Must be created inside a tokio runtime.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use tether_crypto::exchange::EphemeralKeyPair;
use tether_crypto::identity::verify_signature;
use tether_crypto::sealed::KdfParams;
use tether_crypto::session_crypto::derive_session_key;
use tether_crypto::transcript::{begin_transcript, finish_transcript};
use tether_transport::{ConnectionStats, RequestClient, TransportEvent};

use crate::errors::{
    AuthError, ChannelError, IdentityError, PairingError, SecurityError, SessionError,
};
use crate::identity_store::IdentityStore;
use crate::pairing::{PairingStore, PinnedPeerIdentity};
use crate::protocol::{
    commands, decode_b64, decode_key32, encode_b64, AppIdentity, Availability,
    BeginHandshakeParams, BeginHandshakeReply, CheckPairingStatusParams, CloseSessionParams,
    FinishHandshakeParams, FinishHandshakeReply, GetAppIdentityParams, PairingStatus,
    SecurePayload, SecureReply, SecureRequestParams, SecureResult,
};
use crate::session::{HandshakeState, Session};
use crate::store::KeyValueStore;

/// Reason attached to the pairing-required notification when no pin exists.
pub const NOT_PAIRED_REASON: &str = "not paired";

const EVENT_CAPACITY: usize = 16;

/// Timeout budgets and key derivation cost.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Availability checks
    pub short_timeout: Duration,
    /// Pairing and the finish step of the handshake
    pub long_timeout: Duration,
    /// Everything else
    pub default_timeout: Duration,
    /// Argon2id cost for new identity records
    pub kdf: KdfParams,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            short_timeout: Duration::from_secs(2),
            long_timeout: Duration::from_secs(120),
            default_timeout: Duration::from_secs(15),
            kdf: KdfParams::default(),
        }
    }
}

/// Where the channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unpaired,
    PairedNoSession,
    Handshaking,
    SessionActive,
}

/// Notifications for the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    PairingRequired { reason: String },
    Disconnected { message: Option<String> },
}

/// Result of the begin step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Established { session_id: String },
    Failed(ChannelError),
}

/// Supplies the user secret when a session needs the identity unlocked.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn user_secret(&self) -> Option<Zeroizing<String>>;
}

/// A secret known up front.
pub struct FixedSecret(Zeroizing<String>);

impl FixedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }
}

#[async_trait]
impl SecretProvider for FixedSecret {
    async fn user_secret(&self) -> Option<Zeroizing<String>> {
        Some(self.0.clone())
    }
}

type HandshakeSlot = watch::Receiver<Option<Result<(), ChannelError>>>;

struct Inner {
    client: RequestClient,
    identity: IdentityStore,
    pairing: PairingStore,
    config: ChannelConfig,
    secret: RwLock<Option<Arc<dyn SecretProvider>>>,
    session: Mutex<Option<Arc<Session>>>,
    handshake: Mutex<Option<HandshakeState>>,
    in_flight: Mutex<Option<HandshakeSlot>>,
    events: broadcast::Sender<ChannelEvent>,
}

/// Client end of the companion channel.
pub struct Channel {
    inner: Arc<Inner>,
    forwarder: JoinHandle<()>,
}

impl Channel {
    pub fn new(client: RequestClient, store: Arc<dyn KeyValueStore>, config: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let transport_events = client.subscribe();
        let inner = Arc::new(Inner {
            client,
            identity: IdentityStore::new(store.clone(), config.kdf),
            pairing: PairingStore::new(store),
            config,
            secret: RwLock::new(None),
            session: Mutex::new(None),
            handshake: Mutex::new(None),
            in_flight: Mutex::new(None),
            events,
        });
        let forwarder = tokio::spawn(forward_transport_events(
            Arc::downgrade(&inner),
            transport_events,
        ));
        Self { inner, forwarder }
    }

    /// Use `provider` for the user secret whenever a session must be established.
    pub fn set_secret_provider(&self, provider: Arc<dyn SecretProvider>) {
        *self.inner.secret.write() = Some(provider);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.inner.identity
    }

    pub fn transport_stats(&self) -> ConnectionStats {
        self.inner.client.stats()
    }

    pub async fn state(&self) -> ChannelState {
        if self.inner.active_session().is_some() {
            return ChannelState::SessionActive;
        }
        if self.inner.in_flight.lock().is_some() || self.inner.handshake.lock().is_some() {
            return ChannelState::Handshaking;
        }
        match self.inner.pairing.load().await {
            Ok(Some(_)) => ChannelState::PairedNoSession,
            Ok(None) => ChannelState::Unpaired,
            Err(e) => {
                warn!(error = %e, "Failed to read pairing state");
                ChannelState::Unpaired
            }
        }
    }

    /// True iff the pinned identity is fully present.
    pub async fn is_paired(&self) -> Result<bool, ChannelError> {
        Ok(self.inner.pairing.is_paired().await?)
    }

    pub async fn pinned_identity(&self) -> Result<Option<PinnedPeerIdentity>, ChannelError> {
        Ok(self.inner.pairing.load().await?)
    }

    /// Pin the companion identity using a pairing token shown by the companion.
    pub async fn pair(&self, pairing_token: &str) -> Result<PinnedPeerIdentity, ChannelError> {
        self.inner.pair(pairing_token).await
    }

    /// Forget the pinned identity and close the session.
    pub async fn unpair(&self) -> Result<(), ChannelError> {
        self.inner.pairing.clear().await?;
        let session = self.inner.session.lock().clone();
        if let Some(session) = session {
            self.inner.close_session(session.id()).await;
        }
        self.inner.drop_session();
        info!("Companion unpaired");
        Ok(())
    }

    /// Provide the user secret and unlock (or create) the client identity.
    pub async fn unlock(&self, secret: &str) -> Result<(), ChannelError> {
        self.inner.identity.ensure_unlocked(secret).await.map(|_| ())
    }

    pub async fn check_availability(&self) -> Availability {
        self.inner.check_availability().await
    }

    /// Ask the companion whether it still knows this client.
    pub async fn check_pairing_status(&self) -> Result<PairingStatus, ChannelError> {
        let Some(public_key) = self.inner.identity.public_key().await? else {
            return Ok(PairingStatus { paired: false });
        };
        let params = CheckPairingStatusParams {
            client_signing_public_key_encoded: encode_b64(&public_key),
        };
        self.inner
            .call(
                commands::CHECK_PAIRING_STATUS,
                &params,
                self.inner.config.default_timeout,
            )
            .await
    }

    pub async fn begin_handshake(&self) -> HandshakeOutcome {
        self.inner.begin_handshake().await
    }

    pub async fn finish_handshake(&self) -> Result<(), ChannelError> {
        self.inner.finish_handshake().await
    }

    /// Make sure a confirmed session exists, sharing any handshake already running.
    pub async fn ensure_session(&self) -> Result<(), ChannelError> {
        self.inner.ensure_session().await
    }

    /// Send an encrypted request, with one re-handshake and retry on session loss.
    pub async fn secure_request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ChannelError> {
        let inner = &self.inner;
        let timeout = timeout.unwrap_or(inner.config.default_timeout);

        // Join a handshake that is already running rather than racing it.
        if inner.active_session().is_none() && inner.handshake_in_flight() {
            inner.ensure_session().await?;
        }

        let session = inner.active_session();
        let err = match inner
            .secure_request_once(session.as_ref(), method, &params, timeout)
            .await
        {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_session_recoverable() {
            return Err(err);
        }

        info!(method, error = %err, "Secure request failed; re-establishing session");
        if let Some(session) = &session {
            inner.drop_session_id(session.id());
        }
        let retry = match inner.ensure_session().await {
            Ok(()) => {
                inner
                    .secure_request_once(inner.active_session().as_ref(), method, &params, timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        match retry {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(method, error = %e, "Secure request retry failed");
                if e.is_identity_level() {
                    inner.clear_if_paired(&e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    /// Id of the confirmed session, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner.active_session().map(|s| s.id().to_owned())
    }

    /// Tell the companion the session is over and drop it locally.
    pub async fn close_session(&self, session_id: &str) {
        self.inner.close_session(session_id).await;
    }

    /// Drop session and pairing, erase the client identity and ask for re-pairing.
    pub async fn clear_session(&self, reason: &str) {
        self.inner.clear_session(reason).await;
    }

    /// Close the current session, if any, and disconnect from the companion.
    pub async fn shutdown(&self) {
        let session = self.inner.session.lock().clone();
        if let Some(session) = session {
            self.inner.close_session(session.id()).await;
        }
        self.inner.client.disconnect().await;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn forward_transport_events(
    inner: Weak<Inner>,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Transport events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else { break };
        match event {
            TransportEvent::Disconnected { message } => {
                inner.drop_session();
                inner.emit(ChannelEvent::Disconnected { message });
            }
            TransportEvent::Event(event) => {
                debug!(event = %event.event, "Companion event");
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn active_session(&self) -> Option<Arc<Session>> {
        self.session.lock().as_ref().filter(|s| s.is_active()).cloned()
    }

    fn handshake_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Drop the session, keeping pairing.
    fn drop_session(&self) {
        if let Some(session) = self.session.lock().take() {
            debug!(session_id = %session.id(), "Session dropped");
        }
    }

    /// Drop the session only if it is still `session_id`.
    fn drop_session_id(&self, session_id: &str) -> bool {
        let mut current = self.session.lock();
        if current.as_ref().is_some_and(|s| s.id() == session_id) {
            current.take();
            debug!(session_id, "Session dropped");
            return true;
        }
        false
    }

    fn discard_handshake(&self) {
        if let Some(mut state) = self.handshake.lock().take() {
            state.wipe();
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        command: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, ChannelError> {
        let params =
            serde_json::to_value(params).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        let response = self.client.send_request(command, params, timeout).await?;
        let value = response.into_result().map_err(ChannelError::from_remote)?;
        serde_json::from_value(value)
            .map_err(|e| ChannelError::Protocol(format!("{command}: {e}")))
    }

    async fn pair(&self, pairing_token: &str) -> Result<PinnedPeerIdentity, ChannelError> {
        if pairing_token.trim().is_empty() {
            return Err(PairingError::TokenMissing.into());
        }

        let client_key = self.identity.ensure_generated_for_pairing().await?;
        let params = GetAppIdentityParams {
            pairing_token: pairing_token.to_owned(),
            client_signing_public_key_encoded: Some(encode_b64(&client_key)),
        };
        let app: AppIdentity = self
            .call(commands::GET_APP_IDENTITY, &params, self.config.long_timeout)
            .await?;

        let signing_public_key = decode_key32(&app.signing_public_key).ok_or_else(|| {
            ChannelError::Protocol("companion signing key must be 32 bytes".into())
        })?;
        let exchange_public_key = decode_key32(&app.exchange_public_key).ok_or_else(|| {
            ChannelError::Protocol("companion exchange key must be 32 bytes".into())
        })?;
        if app.fingerprint.is_empty() {
            return Err(ChannelError::Protocol("companion fingerprint missing".into()));
        }

        let pinned = PinnedPeerIdentity {
            fingerprint: app.fingerprint,
            signing_public_key,
            exchange_public_key,
        };
        self.pairing.save(&pinned).await?;
        self.drop_session();

        info!(fingerprint = %pinned.fingerprint, "Paired with companion");
        Ok(pinned)
    }

    async fn check_availability(&self) -> Availability {
        let result: Result<Availability, ChannelError> = self
            .call(commands::CHECK_AVAILABILITY, &Value::Null, self.config.short_timeout)
            .await;
        result.unwrap_or_else(|e| {
            debug!(error = %e, "Companion unavailable");
            Availability {
                available: false,
                message: Some(e.to_string()),
            }
        })
    }

    async fn begin_handshake(&self) -> HandshakeOutcome {
        match self.try_begin_handshake().await {
            Ok(session_id) => HandshakeOutcome::Established { session_id },
            Err(e) => {
                self.discard_handshake();
                HandshakeOutcome::Failed(e)
            }
        }
    }

    async fn try_begin_handshake(&self) -> Result<String, ChannelError> {
        let ephemeral = EphemeralKeyPair::generate();
        let own_eph = ephemeral.public_key();
        *self.handshake.lock() = Some(HandshakeState::new(ephemeral));
        self.drop_session();

        let params = BeginHandshakeParams {
            own_ephemeral_public_key_encoded: encode_b64(&own_eph),
        };
        let reply: BeginHandshakeReply = self
            .call(commands::BEGIN_HANDSHAKE, &params, self.config.default_timeout)
            .await?;

        let Some(pinned) = self.pairing.load().await? else {
            self.clear_session(NOT_PAIRED_REASON).await;
            return Err(SecurityError::NotPaired.into());
        };

        let client_key = self
            .identity
            .public_key()
            .await?
            .ok_or(IdentityError::Missing)?;
        let peer_eph = decode_key32(&reply.peer_ephemeral_public_key_encoded).ok_or_else(|| {
            ChannelError::Protocol("peer ephemeral key must be 32 bytes".into())
        })?;
        let signature =
            decode_b64(&reply.signature_encoded).map_err(|_| SecurityError::SignatureInvalid)?;

        let transcript = begin_transcript(&peer_eph, &own_eph, &client_key);
        if verify_signature(&pinned.signing_public_key, transcript.as_bytes(), &signature).is_err()
        {
            warn!(
                session_id = %reply.session_id,
                fingerprint = %pinned.fingerprint,
                "Companion handshake signature invalid"
            );
            return Err(SecurityError::SignatureInvalid.into());
        }

        let shared = {
            let mut guard = self.handshake.lock();
            let state = guard.as_mut().ok_or(SessionError::HandshakeFailed)?;
            let shared = state
                .ephemeral()
                .diffie_hellman(&peer_eph)
                .map_err(|_| SessionError::HandshakeFailed)?;
            state.record_begin(reply.session_id.clone(), peer_eph);
            shared
        };
        let key = derive_session_key(&shared[..], transcript.as_bytes());

        *self.session.lock() = Some(Arc::new(Session::new(
            reply.session_id.clone(),
            key,
            reply.peer_ephemeral_public_key_encoded,
        )));
        debug!(session_id = %reply.session_id, "Handshake begun");
        Ok(reply.session_id)
    }

    async fn finish_handshake(&self) -> Result<(), ChannelError> {
        // The private half is not needed past this point.
        let inputs = {
            let mut guard = self.handshake.lock();
            let inputs = guard.as_ref().and_then(HandshakeState::finish_inputs);
            if let Some(mut state) = guard.take() {
                state.wipe();
            }
            inputs
        };
        let Some((session_id, peer_eph, own_eph)) = inputs else {
            return Err(SessionError::HandshakeFailed.into());
        };

        match self.send_finish(&session_id, &peer_eph, &own_eph).await {
            Ok(()) => {}
            Err(e) if e.is_user_actionable() || matches!(e, ChannelError::Transport(_)) => {
                warn!(error = %e, "Handshake finish did not complete; pairing kept");
                self.drop_session_id(&session_id);
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "Handshake finish failed; clearing pairing");
                self.clear_session(&e.to_string()).await;
                return Err(e);
            }
        }

        let session = self.session.lock().clone();
        match session {
            Some(session) if session.id() == session_id => {
                session.activate();
                info!(
                    session_id = %session_id,
                    peer_ephemeral = %session.peer_ephemeral_public_key_encoded(),
                    "Secure session established"
                );
                Ok(())
            }
            _ => {
                warn!(session_id = %session_id, "Local session replaced before finish; pairing kept");
                Err(SessionError::HandshakeFailed.into())
            }
        }
    }

    async fn send_finish(
        &self,
        session_id: &str,
        peer_eph: &[u8; 32],
        own_eph: &[u8; 32],
    ) -> Result<(), ChannelError> {
        let identity = self.identity.unlocked().ok_or(AuthError::SecretRequired)?;
        let transcript = finish_transcript(session_id, peer_eph, own_eph, &identity.public_key());
        let signature = identity.sign(transcript.as_bytes());

        let params = FinishHandshakeParams {
            session_id: session_id.to_owned(),
            client_signature_encoded: encode_b64(&signature),
        };
        let reply: FinishHandshakeReply = self
            .call(commands::FINISH_HANDSHAKE, &params, self.config.long_timeout)
            .await?;
        if !reply.ok {
            return Err(reply
                .error
                .map(ChannelError::from_remote)
                .unwrap_or(SessionError::HandshakeFailed.into()));
        }
        Ok(())
    }

    async fn ensure_session(self: &Arc<Self>) -> Result<(), ChannelError> {
        if self.active_session().is_some() {
            return Ok(());
        }

        let mut slot = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(slot) => slot.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *in_flight = Some(rx.clone());
                    let inner = self.clone();
                    tokio::spawn(async move {
                        let result = inner.establish_session().await;
                        // Result first, then free the slot.
                        let mut in_flight = inner.in_flight.lock();
                        let _ = tx.send(Some(result));
                        in_flight.take();
                    });
                    rx
                }
            }
        };

        loop {
            let settled = slot.borrow_and_update().clone();
            if let Some(result) = settled {
                return result;
            }
            if slot.changed().await.is_err() {
                let settled = slot.borrow().clone();
                return settled.unwrap_or(Err(SessionError::HandshakeFailed.into()));
            }
        }
    }

    async fn establish_session(&self) -> Result<(), ChannelError> {
        if self.pairing.load().await?.is_none() {
            self.emit(ChannelEvent::PairingRequired {
                reason: NOT_PAIRED_REASON.to_owned(),
            });
            return Err(SecurityError::NotPaired.into());
        }

        match self.unlock_identity().await {
            Ok(()) => {}
            Err(e @ ChannelError::Auth(AuthError::SecretRequired)) => return Err(e),
            Err(e) => debug!(error = %e, "Identity unlock failed; continuing with handshake"),
        }

        let result = match self.begin_handshake().await {
            HandshakeOutcome::Established { .. } => self.finish_handshake().await,
            HandshakeOutcome::Failed(e) => Err(e),
        };
        result.map_err(into_handshake_error)
    }

    async fn unlock_identity(&self) -> Result<(), ChannelError> {
        if self.identity.is_unlocked() {
            return Ok(());
        }
        let provider = self.secret.read().clone();
        let secret = match provider {
            Some(provider) => provider
                .user_secret()
                .await
                .unwrap_or_else(|| Zeroizing::new(String::new())),
            None => Zeroizing::new(String::new()),
        };
        self.identity.ensure_unlocked(&secret).await.map(|_| ())
    }

    async fn secure_request_once(
        &self,
        session: Option<&Arc<Session>>,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        let session = session.ok_or(SessionError::NoSession)?;
        let sequence = session.next_sequence();

        let payload = serde_json::to_vec(&SecurePayload {
            method: method.to_owned(),
            params: params.clone(),
        })
        .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        let (nonce, ciphertext) = session
            .seal(&payload)
            .map_err(|_| SessionError::SecureRequestFailed)?;

        let request = SecureRequestParams {
            session_id: session.id().to_owned(),
            nonce_encoded: encode_b64(&nonce),
            ciphertext_encoded: encode_b64(&ciphertext),
            sequence,
        };
        let reply: SecureReply = self
            .call(commands::SECURE_REQUEST, &request, timeout)
            .await?;

        let nonce = decode_b64(&reply.nonce_encoded).map_err(|_| SessionError::DecryptFailed)?;
        let ciphertext =
            decode_b64(&reply.ciphertext_encoded).map_err(|_| SessionError::DecryptFailed)?;
        let plaintext = session.open(&nonce, &ciphertext).map_err(|_| {
            debug!(session_id = %session.id(), sequence, "Response failed to decrypt");
            SessionError::DecryptFailed
        })?;

        let result: SecureResult = serde_json::from_slice(&plaintext)
            .map_err(|e| ChannelError::Protocol(format!("secure response: {e}")))?;
        if !result.ok {
            return Err(result
                .error
                .map(ChannelError::from_remote)
                .unwrap_or(SessionError::SecureRequestFailed.into()));
        }
        Ok(result.result.unwrap_or(Value::Null))
    }

    async fn close_session(&self, session_id: &str) {
        let params = CloseSessionParams {
            session_id: session_id.to_owned(),
        };
        let result: Result<Value, ChannelError> = self
            .call(commands::CLOSE_SESSION, &params, self.config.default_timeout)
            .await;
        if let Err(e) = result {
            debug!(session_id, error = %e, "closeSession failed; dropping session anyway");
        }

        if self.drop_session_id(session_id) {
            info!(session_id, "Session closed");
        }
    }

    /// Clear pairing unless an earlier step of the same failure already did.
    async fn clear_if_paired(&self, reason: &str) {
        match self.pairing.load().await {
            Ok(None) => debug!(reason, "Pairing already cleared"),
            _ => self.clear_session(reason).await,
        }
    }

    async fn clear_session(&self, reason: &str) {
        self.drop_session();
        self.discard_handshake();

        if let Err(e) = self.pairing.clear().await {
            warn!(error = %e, "Failed to erase pairing");
        }
        if let Err(e) = self.identity.clear().await {
            warn!(error = %e, "Failed to erase client identity");
        }

        info!(reason, "Pairing cleared");
        self.emit(ChannelEvent::PairingRequired {
            reason: reason.to_owned(),
        });
    }
}

/// Errors outside the channel taxonomy surface as a failed handshake.
fn into_handshake_error(e: ChannelError) -> ChannelError {
    match e {
        ChannelError::Protocol(_)
        | ChannelError::Store(_)
        | ChannelError::Identity(IdentityError::Store(_) | IdentityError::Crypto(_)) => {
            warn!(error = %e, "Handshake failed");
            SessionError::HandshakeFailed.into()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{test_config, FakeCompanion};
    use crate::store::MemoryStore;

    #[test]
    fn test_default_budgets() {
        let config = ChannelConfig::default();
        assert_eq!(config.short_timeout, Duration::from_secs(2));
        assert_eq!(config.long_timeout, Duration::from_secs(120));
        assert_eq!(config.default_timeout, Duration::from_secs(15));
    }

    fn stray_session(id: &str) -> Arc<Session> {
        let key = derive_session_key(&[7u8; 32], id.as_bytes());
        Arc::new(Session::new(id.to_owned(), key, String::new()))
    }

    #[tokio::test]
    async fn test_drop_session_id_leaves_other_sessions() {
        let (_companion, channel, _store) = FakeCompanion::with_channel("1");
        *channel.inner.session.lock() = Some(stray_session("sess-a"));

        assert!(!channel.inner.drop_session_id("sess-b"));
        assert!(channel.inner.session.lock().is_some());
        assert!(channel.inner.drop_session_id("sess-a"));
        assert!(channel.inner.session.lock().is_none());
    }

    #[tokio::test]
    async fn test_in_flight_slot_frees_after_settle() {
        let (companion, channel, _store) = FakeCompanion::with_channel("1");

        assert!(channel.ensure_session().await.is_err());
        assert!(!channel.inner.handshake_in_flight());
        assert!(channel.ensure_session().await.is_err());
        assert_eq!(companion.begin_count(), 0);
    }

    #[tokio::test]
    async fn test_replaced_session_fails_finish_without_clearing() {
        let (_companion, channel, _store) = FakeCompanion::with_channel("1");
        channel.pair("1").await.unwrap();
        channel.unlock("pw").await.unwrap();
        let mut events = channel.subscribe();

        assert!(matches!(
            channel.begin_handshake().await,
            HandshakeOutcome::Established { .. }
        ));
        *channel.inner.session.lock() = Some(stray_session("sess-other"));

        assert_eq!(
            channel.finish_handshake().await.unwrap_err(),
            ChannelError::Session(SessionError::HandshakeFailed)
        );
        assert!(channel.is_paired().await.unwrap());
        assert!(channel.identity().public_key().await.unwrap().is_some());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finish_timeout_keeps_pairing() {
        let (companion, client) = FakeCompanion::start("1");
        let config = ChannelConfig {
            long_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let channel = Channel::new(client, Arc::new(MemoryStore::new()), config);
        channel.pair("1").await.unwrap();
        channel.unlock("pw").await.unwrap();
        companion.silence(commands::FINISH_HANDSHAKE);

        assert_eq!(
            channel.ensure_session().await.unwrap_err(),
            ChannelError::Transport(tether_transport::TransportError::Timeout)
        );
        assert!(channel.is_paired().await.unwrap());
        assert_eq!(channel.session_id(), None);
        assert!(channel.inner.session.lock().is_none());
    }

    #[test]
    fn test_unexpected_errors_become_handshake_failed() {
        assert_eq!(
            into_handshake_error(ChannelError::Protocol("bad".into())),
            ChannelError::Session(SessionError::HandshakeFailed)
        );
        assert_eq!(
            into_handshake_error(SecurityError::SignatureInvalid.into()),
            ChannelError::Security(SecurityError::SignatureInvalid)
        );
        assert_eq!(
            into_handshake_error(tether_transport::TransportError::Timeout.into()),
            ChannelError::Transport(tether_transport::TransportError::Timeout)
        );
    }
}
