//! Handshake transcripts.
//!
//! Both transcripts are plain concatenations of fixed-length keys, with
//! no tags or length prefixes, so the companion can rebuild them byte for
//! byte. The second transcript carries a protocol tag and the session id
//! ahead of the keys so a finish signature cannot be replayed against a
//! different session.

use bytes::BytesMut;

/// Domain separator for the finish transcript.
pub const PROTOCOL_TAG: &str = "tether-handshake-v1";

/// Raw byte transcript builder.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    buf: BytesMut,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128),
        }
    }

    /// Append raw bytes.
    pub fn append(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Append a string as UTF-8.
    pub fn append_str(&mut self, s: &str) -> &mut Self {
        self.append(s.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Transcript the companion signs in its begin response:
/// `peer_eph || own_eph || client_public_key`.
pub fn begin_transcript(peer_eph: &[u8], own_eph: &[u8], client_public_key: &[u8]) -> Transcript {
    let mut t = Transcript::new();
    t.append(peer_eph).append(own_eph).append(client_public_key);
    t
}

/// Transcript the client signs to finish:
/// `PROTOCOL_TAG || session_id || peer_eph || own_eph || client_public_key`.
pub fn finish_transcript(
    session_id: &str,
    peer_eph: &[u8],
    own_eph: &[u8],
    client_public_key: &[u8],
) -> Transcript {
    let mut t = Transcript::new();
    t.append_str(PROTOCOL_TAG)
        .append_str(session_id)
        .append(peer_eph)
        .append(own_eph)
        .append(client_public_key);
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_transcript_is_plain_concatenation() {
        let t = begin_transcript(&[1u8; 32], &[2u8; 32], &[3u8; 32]);
        let bytes = t.as_bytes();

        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[..32], &[1u8; 32]);
        assert_eq!(&bytes[32..64], &[2u8; 32]);
        assert_eq!(&bytes[64..], &[3u8; 32]);
    }

    #[test]
    fn test_finish_transcript_layout() {
        let t = finish_transcript("sess-1", &[1u8; 32], &[2u8; 32], &[3u8; 32]);
        let bytes = t.as_bytes();
        let prefix = b"tether-handshake-v1sess-1";

        assert_eq!(&bytes[..prefix.len()], prefix);
        assert_eq!(bytes.len(), prefix.len() + 96);
        assert_eq!(&bytes[prefix.len()..prefix.len() + 32], &[1u8; 32]);
    }

    #[test]
    fn test_session_id_changes_finish_transcript() {
        let a = finish_transcript("a", &[1u8; 32], &[2u8; 32], &[3u8; 32]);
        let b = finish_transcript("b", &[1u8; 32], &[2u8; 32], &[3u8; 32]);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
