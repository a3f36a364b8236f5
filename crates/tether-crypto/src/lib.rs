//! Cryptographic building blocks for the Tether companion channel.
//!
//! - `identity`: long-term Ed25519 signing identity of the client
//! - `exchange`: ephemeral X25519 key agreement for the handshake
//! - `transcript`: byte transcripts signed and hashed during the handshake
//! - `session_crypto`: session key derivation and ChaCha20-Poly1305 payload sealing
//! - `sealed`: Argon2id + ChaCha20-Poly1305 sealing of secrets at rest

#![forbid(unsafe_code)]

pub mod hash;
pub mod identity;
pub mod exchange;
pub mod transcript;
pub mod session_crypto;
pub mod sealed;

#[cfg(test)]
mod proptests;

/// Fill a fixed-size array from the OS RNG.
pub fn random_array<const N: usize>() -> Result<[u8; N], getrandom::Error> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out)?;
    Ok(out)
}
