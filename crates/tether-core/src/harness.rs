//! In-process fake companion for exercising the channel end to end.
//!
//! [`FakeCompanion`] speaks the companion protocol over a [`MemoryLink`]
//! with real keys, so handshakes, signatures and encryption are checked
//! for real. Knobs inject the failures the channel has to classify.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use tether_crypto::exchange::EphemeralKeyPair;
use tether_crypto::identity::{verify_signature, SigningIdentity};
use tether_crypto::sealed::KdfParams;
use tether_crypto::session_crypto::derive_session_key;
use tether_crypto::transcript::{begin_transcript, finish_transcript};
use tether_transport::{
    Event, Framing, LengthPrefixed, Link, MemoryLink, RemoteError, Request, RequestClient,
    Response,
};

use crate::channel::{Channel, ChannelConfig};
use crate::protocol::{
    commands, decode_b64, decode_key32, encode_b64, AppIdentity, Availability,
    BeginHandshakeParams, BeginHandshakeReply, CheckPairingStatusParams, CloseSessionParams,
    FinishHandshakeParams, GetAppIdentityParams, PairingStatus, SecurePayload, SecureReply,
    SecureRequestParams, SecureResult,
};
use crate::session::Session;
use crate::store::{KeyValueStore, MemoryStore};

/// Budgets small enough for tests, with the cheapest KDF.
pub fn test_config() -> ChannelConfig {
    ChannelConfig {
        short_timeout: Duration::from_millis(200),
        long_timeout: Duration::from_secs(2),
        default_timeout: Duration::from_secs(1),
        kdf: KdfParams::insecure_fast(),
    }
}

struct PendingHandshake {
    session: Session,
    companion_eph: [u8; 32],
    client_eph: [u8; 32],
    client_key: [u8; 32],
}

#[derive(Default)]
struct CompanionState {
    known_clients: HashSet<[u8; 32]>,
    last_client: Option<[u8; 32]>,
    pending: HashMap<String, PendingHandshake>,
    sessions: HashMap<String, Session>,
    next_session: u64,

    corrupt_signature: bool,
    begin_error: Option<RemoteError>,
    finish_error: Option<RemoteError>,
    fail_decrypt: usize,
    secure_errors: VecDeque<RemoteError>,
    silent: HashSet<String>,
    delays: HashMap<String, Duration>,
    unavailable: bool,

    begin_count: usize,
    finish_count: usize,
    sequences: Vec<u64>,
    closed: Vec<String>,
}

/// Companion end of an in-memory link.
pub struct FakeCompanion {
    identity: SigningIdentity,
    exchange_public: [u8; 32],
    pairing_token: String,
    framing: LengthPrefixed,
    link: MemoryLink,
    state: Mutex<CompanionState>,
}

impl FakeCompanion {
    /// Start a companion expecting `pairing_token` and return a client connected to it.
    pub fn start(pairing_token: &str) -> (Arc<Self>, RequestClient) {
        let (client_end, companion_end) = MemoryLink::pair();
        let companion = Arc::new(Self {
            identity: SigningIdentity::generate(),
            exchange_public: EphemeralKeyPair::generate().public_key(),
            pairing_token: pairing_token.to_owned(),
            framing: LengthPrefixed::native(),
            link: companion_end,
            state: Mutex::new(CompanionState::default()),
        });
        tokio::spawn(serve(companion.clone()));

        let client = RequestClient::new(Arc::new(client_end), Arc::new(LengthPrefixed::native()));
        (companion, client)
    }

    /// Companion plus a channel over a fresh in-memory store.
    pub fn with_channel(pairing_token: &str) -> (Arc<Self>, Channel, Arc<MemoryStore>) {
        let (companion, client) = Self::start(pairing_token);
        let store = Arc::new(MemoryStore::new());
        let channel = Channel::new(
            client,
            store.clone() as Arc<dyn KeyValueStore>,
            test_config(),
        );
        (companion, channel, store)
    }

    pub fn signing_public_key(&self) -> [u8; 32] {
        self.identity.public_key()
    }

    pub fn fingerprint(&self) -> String {
        self.identity.fingerprint()
    }

    /// Sign begin transcripts with garbage from now on.
    pub fn set_corrupt_signature(&self, corrupt: bool) {
        self.state.lock().corrupt_signature = corrupt;
    }

    /// Answer every `beginHandshake` with `error`.
    pub fn set_begin_error(&self, error: Option<RemoteError>) {
        self.state.lock().begin_error = error;
    }

    /// Answer every `finishHandshake` with `{ok: false, error}`.
    pub fn set_finish_error(&self, error: Option<RemoteError>) {
        self.state.lock().finish_error = error;
    }

    /// Reply to the next `count` secure requests with undecryptable bytes.
    pub fn fail_decrypt_next(&self, count: usize) {
        self.state.lock().fail_decrypt = count;
    }

    /// Fail the next secure request inside the encrypted envelope.
    pub fn push_secure_error(&self, error: RemoteError) {
        self.state.lock().secure_errors.push_back(error);
    }

    /// Never answer `command`.
    pub fn silence(&self, command: &str) {
        self.state.lock().silent.insert(command.to_owned());
    }

    /// Hold every reply to `command` for `by`. Other commands keep flowing.
    pub fn delay(&self, command: &str, by: Duration) {
        self.state.lock().delays.insert(command.to_owned(), by);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Forget all sessions, as after a companion restart.
    pub fn drop_sessions(&self) {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.pending.clear();
    }

    /// Forget paired clients.
    pub fn forget_clients(&self) {
        let mut state = self.state.lock();
        state.known_clients.clear();
        state.last_client = None;
    }

    pub fn begin_count(&self) -> usize {
        self.state.lock().begin_count
    }

    pub fn finish_count(&self) -> usize {
        self.state.lock().finish_count
    }

    /// Sequence numbers of every accepted secure request.
    pub fn sequences(&self) -> Vec<u64> {
        self.state.lock().sequences.clone()
    }

    pub fn closed_sessions(&self) -> Vec<String> {
        self.state.lock().closed.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Push an unsolicited event to the client.
    pub async fn push_event(&self, event: &str, data: Value) -> bool {
        let event = Event {
            event: event.to_owned(),
            data,
        };
        self.send_json(&event).await
    }

    /// Close the companion end of the link.
    pub async fn disconnect(&self) {
        let _ = self.link.close().await;
    }

    async fn send_json<T: Serialize>(&self, message: &T) -> bool {
        let Ok(body) = serde_json::to_vec(message) else {
            return false;
        };
        let Ok(frame) = self.framing.wrap(&body) else {
            return false;
        };
        self.link.send(&frame).await.is_ok()
    }

    fn handle(&self, request: Request) -> Option<Response> {
        if self.state.lock().silent.contains(&request.command) {
            debug!(command = %request.command, "Companion ignoring request");
            return None;
        }

        let id = request.id.clone();
        let result = match request.command.as_str() {
            commands::GET_APP_IDENTITY => self.get_app_identity(request.params),
            commands::BEGIN_HANDSHAKE => self.begin_handshake(request.params),
            commands::FINISH_HANDSHAKE => self.finish_handshake(request.params),
            commands::SECURE_REQUEST => self.secure_request(request.params),
            commands::CLOSE_SESSION => self.close_session(request.params),
            commands::CHECK_AVAILABILITY => self.check_availability(),
            commands::CHECK_PAIRING_STATUS => self.check_pairing_status(request.params),
            other => Err(RemoteError::new("unknown_command", other)),
        };
        Some(match result {
            Ok(value) => Response::success(id, value),
            Err(error) => Response::failure(id, error),
        })
    }

    fn get_app_identity(&self, params: Value) -> Result<Value, RemoteError> {
        let params: GetAppIdentityParams = parse(params)?;
        if params.pairing_token.is_empty() {
            return Err(RemoteError::new("pairing_token_missing", "pairing token missing"));
        }
        if params.pairing_token != self.pairing_token {
            return Err(RemoteError::new("pairing_token_invalid", "pairing token rejected"));
        }

        if let Some(key) = params
            .client_signing_public_key_encoded
            .as_deref()
            .and_then(decode_key32)
        {
            let mut state = self.state.lock();
            state.known_clients.insert(key);
            state.last_client = Some(key);
        }

        to_value(AppIdentity {
            signing_public_key: encode_b64(&self.identity.public_key()),
            exchange_public_key: encode_b64(&self.exchange_public),
            fingerprint: self.identity.fingerprint(),
        })
    }

    fn begin_handshake(&self, params: Value) -> Result<Value, RemoteError> {
        let params: BeginHandshakeParams = parse(params)?;
        let client_eph = decode_key32(&params.own_ephemeral_public_key_encoded)
            .ok_or_else(|| RemoteError::new("handshake_failed", "bad ephemeral key"))?;

        let mut state = self.state.lock();
        state.begin_count += 1;
        if let Some(error) = state.begin_error.clone() {
            return Err(error);
        }

        let client_key = state.last_client.unwrap_or([0u8; 32]);
        let ephemeral = EphemeralKeyPair::generate();
        let companion_eph = ephemeral.public_key();
        let transcript = begin_transcript(&companion_eph, &client_eph, &client_key);

        let mut signature = self.identity.sign(transcript.as_bytes());
        if state.corrupt_signature {
            signature[0] ^= 0xff;
        }

        let shared = ephemeral
            .diffie_hellman(&client_eph)
            .map_err(|_| RemoteError::new("handshake_failed", "key exchange failed"))?;
        let key = derive_session_key(&shared[..], transcript.as_bytes());

        state.next_session += 1;
        let session_id = format!("sess-{}", state.next_session);
        let companion_eph_encoded = encode_b64(&companion_eph);
        state.pending.insert(
            session_id.clone(),
            PendingHandshake {
                session: Session::new(session_id.clone(), key, encode_b64(&client_eph)),
                companion_eph,
                client_eph,
                client_key,
            },
        );

        to_value(BeginHandshakeReply {
            peer_ephemeral_public_key_encoded: companion_eph_encoded,
            signature_encoded: encode_b64(&signature),
            session_id,
        })
    }

    fn finish_handshake(&self, params: Value) -> Result<Value, RemoteError> {
        let params: FinishHandshakeParams = parse(params)?;
        let mut state = self.state.lock();
        if let Some(error) = state.finish_error.clone() {
            return Ok(json!({"ok": false, "error": error}));
        }
        let pending = state
            .pending
            .remove(&params.session_id)
            .ok_or_else(|| RemoteError::new("session_not_found", "unknown session"))?;

        let transcript = finish_transcript(
            &params.session_id,
            &pending.companion_eph,
            &pending.client_eph,
            &pending.client_key,
        );
        let signature = decode_b64(&params.client_signature_encoded).unwrap_or_default();
        if verify_signature(&pending.client_key, transcript.as_bytes(), &signature).is_err() {
            return Ok(json!({
                "ok": false,
                "error": RemoteError::new("client_signature_invalid", "client signature rejected"),
            }));
        }

        pending.session.activate();
        state.finish_count += 1;
        state.sessions.insert(params.session_id, pending.session);
        Ok(json!({"ok": true}))
    }

    fn secure_request(&self, params: Value) -> Result<Value, RemoteError> {
        let params: SecureRequestParams = parse(params)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let last = state.sequences.last().copied();
        let session = state
            .sessions
            .get(&params.session_id)
            .ok_or_else(|| RemoteError::new("session_not_found", "unknown session"))?;

        let nonce = decode_b64(&params.nonce_encoded).unwrap_or_default();
        let ciphertext = decode_b64(&params.ciphertext_encoded).unwrap_or_default();
        let plaintext = session
            .open(&nonce, &ciphertext)
            .map_err(|_| RemoteError::new("decrypt_failed", "request did not decrypt"))?;
        let payload: SecurePayload = serde_json::from_slice(&plaintext)
            .map_err(|e| RemoteError::new("secure_request_failed", e.to_string()))?;

        let result = match state.secure_errors.pop_front() {
            Some(error) => SecureResult {
                ok: false,
                result: None,
                error: Some(error),
            },
            None => SecureResult {
                ok: true,
                result: Some(json!({
                    "method": payload.method,
                    "params": payload.params,
                    "sequence": params.sequence,
                })),
                error: None,
            },
        };
        let body = serde_json::to_vec(&result)
            .map_err(|e| RemoteError::new("secure_request_failed", e.to_string()))?;
        let (nonce, ciphertext) = session
            .seal(&body)
            .map_err(|_| RemoteError::new("secure_request_failed", "seal failed"))?;

        if last.is_some_and(|last| params.sequence <= last) {
            debug!(sequence = params.sequence, "Companion saw a non-increasing sequence");
        }
        state.sequences.push(params.sequence);

        if state.fail_decrypt > 0 {
            state.fail_decrypt -= 1;
            return to_value(SecureReply {
                nonce_encoded: encode_b64(&[0u8; 12]),
                ciphertext_encoded: encode_b64(&[0xa5; 48]),
            });
        }

        to_value(SecureReply {
            nonce_encoded: encode_b64(&nonce),
            ciphertext_encoded: encode_b64(&ciphertext),
        })
    }

    fn close_session(&self, params: Value) -> Result<Value, RemoteError> {
        let params: CloseSessionParams = parse(params)?;
        let mut state = self.state.lock();
        state.sessions.remove(&params.session_id);
        state.closed.push(params.session_id);
        Ok(json!({"ok": true}))
    }

    fn check_availability(&self) -> Result<Value, RemoteError> {
        let unavailable = self.state.lock().unavailable;
        to_value(Availability {
            available: !unavailable,
            message: unavailable.then(|| "companion locked".to_owned()),
        })
    }

    fn check_pairing_status(&self, params: Value) -> Result<Value, RemoteError> {
        let params: CheckPairingStatusParams = parse(params)?;
        let paired = decode_key32(&params.client_signing_public_key_encoded)
            .is_some_and(|key| self.state.lock().known_clients.contains(&key));
        to_value(PairingStatus { paired })
    }
}

async fn serve(companion: Arc<FakeCompanion>) {
    loop {
        let chunk = match companion.link.recv().await {
            Ok(Some(chunk)) => chunk,
            _ => break,
        };
        let request = companion
            .framing
            .decode(&chunk)
            .ok()
            .and_then(|body| serde_json::from_slice::<Request>(&body).ok());
        let Some(request) = request else {
            debug!(len = chunk.len(), "Companion dropped unreadable frame");
            continue;
        };
        let delay = companion.state.lock().delays.get(&request.command).copied();
        if let Some(delay) = delay {
            let companion = companion.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(response) = companion.handle(request) {
                    companion.send_json(&response).await;
                }
            });
            continue;
        }

        if let Some(response) = companion.handle(request) {
            if !companion.send_json(&response).await {
                break;
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RemoteError> {
    serde_json::from_value(params).map_err(|e| RemoteError::new("bad_request", e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| RemoteError::new("internal", e.to_string()))
}
