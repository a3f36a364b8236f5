//! Tether core - pairing, handshake and secure sessions with a companion process.
//!
//! This crate implements:
//! - The client identity store (Argon2id-sealed Ed25519 key)
//! - Pinned companion identity
//! - The signed ephemeral handshake and encrypted request channel
//! - Persistent storage abstraction
//! - The error taxonomy shared with callers

#![forbid(unsafe_code)]

// State machines
pub mod channel;
pub mod pairing;
pub mod session;

// Infrastructure
pub mod identity_store;
pub mod protocol;
pub mod store;

// Supporting modules
pub mod errors;
pub mod harness;

pub use channel::{
    Channel, ChannelConfig, ChannelEvent, ChannelState, FixedSecret, HandshakeOutcome,
    SecretProvider,
};
pub use errors::{
    AuthError, ChannelError, ErrorCode, IdentityError, PairingError, SecurityError, SessionError,
};
pub use identity_store::IdentityStore;
pub use pairing::{PairingStore, PinnedPeerIdentity};
pub use protocol::{Availability, PairingStatus};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
