//! Error taxonomy for the companion channel.
//!
//! Every failure is produced as one of these variants where it happens.
//! Companion error codes are mapped by exact match in
//! [`ChannelError::from_remote`]; nothing is reconstructed from message text.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use tether_transport::{RemoteError, TransportError};

pub use crate::store::StoreError;

/// Pairing errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PairingError {
    #[error("pairing token missing")]
    TokenMissing,
}

/// Trust failures between client and companion.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// The companion's handshake signature did not verify against the pinned key
    #[error("signature invalid")]
    SignatureInvalid,

    /// The companion rejected the client's finish signature
    #[error("client signature invalid")]
    ClientSignatureInvalid,

    /// The companion has lost its own identity keys and needs re-pairing
    #[error("identity keys unavailable")]
    PeerIdentityKeysUnavailable,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not paired")]
    NotPaired,
}

/// Session lifecycle errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session")]
    NoSession,

    #[error("session not found")]
    SessionNotFound,

    #[error("decrypt failed")]
    DecryptFailed,

    #[error("handshake failed")]
    HandshakeFailed,

    #[error("secure request failed")]
    SecureRequestFailed,
}

/// User secret errors. Always user-actionable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("secret required")]
    SecretRequired,

    #[error("secret invalid")]
    SecretInvalid,
}

/// Local identity store failures that are not about the user secret.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity unlock already in progress")]
    UnlockInProgress,

    #[error("client identity not found")]
    Missing,

    #[error("identity store error: {0}")]
    Store(#[from] StoreError),

    #[error("identity crypto error: {0}")]
    Crypto(String),
}

/// Unified error type for channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The companion sent something that does not match the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A companion error code with no local meaning
    #[error("companion error {code}: {message}")]
    Remote { code: String, message: String },
}

/// Stable reason codes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PairingTokenMissing,
    SignatureInvalid,
    ClientSignatureInvalid,
    IdentityKeysUnavailable,
    NotAuthenticated,
    NotPaired,
    NoSession,
    SessionNotFound,
    DecryptFailed,
    HandshakeFailed,
    SecureRequestFailed,
    SecretRequired,
    SecretInvalid,
    Timeout,
    Disconnected,
    TransportFailed,
    UnlockInProgress,
    IdentityUnavailable,
    StoreFailed,
    ProtocolViolation,
    Remote,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::PairingTokenMissing => "pairing_token_missing",
            ErrorCode::SignatureInvalid => "signature_invalid",
            ErrorCode::ClientSignatureInvalid => "client_signature_invalid",
            ErrorCode::IdentityKeysUnavailable => "identity_keys_unavailable",
            ErrorCode::NotAuthenticated => "not_authenticated",
            ErrorCode::NotPaired => "not_paired",
            ErrorCode::NoSession => "no_session",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::DecryptFailed => "decrypt_failed",
            ErrorCode::HandshakeFailed => "handshake_failed",
            ErrorCode::SecureRequestFailed => "secure_request_failed",
            ErrorCode::SecretRequired => "secret_required",
            ErrorCode::SecretInvalid => "secret_invalid",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Disconnected => "disconnected",
            ErrorCode::TransportFailed => "transport_failed",
            ErrorCode::UnlockInProgress => "unlock_in_progress",
            ErrorCode::IdentityUnavailable => "identity_unavailable",
            ErrorCode::StoreFailed => "store_failed",
            ErrorCode::ProtocolViolation => "protocol_violation",
            ErrorCode::Remote => "remote",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChannelError {
    /// Map a companion error to the taxonomy by exact code match.
    pub fn from_remote(error: RemoteError) -> Self {
        match error.code.as_str() {
            "pairing_token_missing" => PairingError::TokenMissing.into(),
            "signature_invalid" => SecurityError::SignatureInvalid.into(),
            "client_signature_invalid" => SecurityError::ClientSignatureInvalid.into(),
            "identity_keys_unavailable" => SecurityError::PeerIdentityKeysUnavailable.into(),
            "not_authenticated" => SecurityError::NotAuthenticated.into(),
            "not_paired" => SecurityError::NotPaired.into(),
            "no_session" => SessionError::NoSession.into(),
            "session_not_found" => SessionError::SessionNotFound.into(),
            "decrypt_failed" => SessionError::DecryptFailed.into(),
            "handshake_failed" => SessionError::HandshakeFailed.into(),
            "secure_request_failed" => SessionError::SecureRequestFailed.into(),
            "secret_required" => AuthError::SecretRequired.into(),
            "secret_invalid" => AuthError::SecretInvalid.into(),
            _ => ChannelError::Remote {
                code: error.code,
                message: error.message,
            },
        }
    }

    /// Stable reason code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChannelError::Pairing(PairingError::TokenMissing) => ErrorCode::PairingTokenMissing,
            ChannelError::Security(e) => match e {
                SecurityError::SignatureInvalid => ErrorCode::SignatureInvalid,
                SecurityError::ClientSignatureInvalid => ErrorCode::ClientSignatureInvalid,
                SecurityError::PeerIdentityKeysUnavailable => ErrorCode::IdentityKeysUnavailable,
                SecurityError::NotAuthenticated => ErrorCode::NotAuthenticated,
                SecurityError::NotPaired => ErrorCode::NotPaired,
            },
            ChannelError::Session(e) => match e {
                SessionError::NoSession => ErrorCode::NoSession,
                SessionError::SessionNotFound => ErrorCode::SessionNotFound,
                SessionError::DecryptFailed => ErrorCode::DecryptFailed,
                SessionError::HandshakeFailed => ErrorCode::HandshakeFailed,
                SessionError::SecureRequestFailed => ErrorCode::SecureRequestFailed,
            },
            ChannelError::Auth(AuthError::SecretRequired) => ErrorCode::SecretRequired,
            ChannelError::Auth(AuthError::SecretInvalid) => ErrorCode::SecretInvalid,
            ChannelError::Transport(TransportError::Timeout) => ErrorCode::Timeout,
            ChannelError::Transport(TransportError::Disconnected) => ErrorCode::Disconnected,
            ChannelError::Transport(_) => ErrorCode::TransportFailed,
            ChannelError::Identity(IdentityError::UnlockInProgress) => ErrorCode::UnlockInProgress,
            ChannelError::Identity(_) => ErrorCode::IdentityUnavailable,
            ChannelError::Store(_) => ErrorCode::StoreFailed,
            ChannelError::Protocol(_) => ErrorCode::ProtocolViolation,
            ChannelError::Remote { .. } => ErrorCode::Remote,
        }
    }

    /// The trust relationship itself is broken; local pairing must be cleared.
    pub fn is_identity_level(&self) -> bool {
        matches!(
            self,
            ChannelError::Security(
                SecurityError::PeerIdentityKeysUnavailable
                    | SecurityError::NotPaired
                    | SecurityError::SignatureInvalid
            )
        )
    }

    /// Worth one re-handshake and retry.
    pub fn is_session_recoverable(&self) -> bool {
        matches!(
            self,
            ChannelError::Session(
                SessionError::DecryptFailed
                    | SessionError::NoSession
                    | SessionError::SessionNotFound
                    | SessionError::SecureRequestFailed
            )
        )
    }

    /// The user can fix this without re-pairing.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ChannelError::Auth(_)
                | ChannelError::Pairing(_)
                | ChannelError::Security(SecurityError::ClientSignatureInvalid)
        )
    }
}
