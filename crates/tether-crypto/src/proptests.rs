#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::hash::sha256;
    use crate::identity::{verify_signature, SigningIdentity};
    use crate::session_crypto::{derive_session_key, SessionCipher, NONCE_LEN};
    use crate::transcript::begin_transcript;

    proptest! {
        #[test]
        fn test_session_key_is_hash_of_shared_and_transcript(
            shared in any::<[u8; 32]>(),
            transcript in any::<Vec<u8>>()
        ) {
            let mut joined = shared.to_vec();
            joined.extend_from_slice(&transcript);

            let k1 = derive_session_key(&shared, &transcript);
            let k2 = derive_session_key(&shared, &transcript);
            prop_assert_eq!(k1.as_bytes(), k2.as_bytes());
            prop_assert_eq!(k1.as_bytes(), &sha256(&joined));
        }

        #[test]
        fn test_seal_open_round_trip(
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; NONCE_LEN]>(),
            payload in any::<Vec<u8>>()
        ) {
            let cipher = SessionCipher::new(&derive_session_key(&key, b""));
            let ct = cipher.seal_with_nonce(&nonce, &payload).unwrap();
            prop_assert_eq!(cipher.open(&nonce, &ct).unwrap(), payload);
        }

        #[test]
        fn test_tampered_ciphertext_is_rejected(
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; NONCE_LEN]>(),
            payload in any::<Vec<u8>>(),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8
        ) {
            let cipher = SessionCipher::new(&derive_session_key(&key, b""));
            let mut ct = cipher.seal_with_nonce(&nonce, &payload).unwrap();
            let idx = flip.index(ct.len());
            ct[idx] ^= 1 << bit;
            prop_assert!(cipher.open(&nonce, &ct).is_err());
        }

        #[test]
        fn test_begin_signature_round_trip(
            seed in any::<[u8; 32]>(),
            peer in any::<[u8; 32]>(),
            own in any::<[u8; 32]>(),
            client in any::<[u8; 32]>()
        ) {
            let signer = SigningIdentity::from_secret_bytes(&seed).unwrap();
            let transcript = begin_transcript(&peer, &own, &client);
            let sig = signer.sign(transcript.as_bytes());
            prop_assert!(verify_signature(&signer.public_key(), transcript.as_bytes(), &sig).is_ok());
        }
    }
}
