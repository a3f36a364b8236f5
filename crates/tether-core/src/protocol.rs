//! Companion command names and payload shapes.
//!
//! Binary fields travel as standard base64 with padding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_transport::RemoteError;

/// Command names understood by the companion.
pub mod commands {
    pub const GET_APP_IDENTITY: &str = "getAppIdentity";
    pub const BEGIN_HANDSHAKE: &str = "beginHandshake";
    pub const FINISH_HANDSHAKE: &str = "finishHandshake";
    pub const SECURE_REQUEST: &str = "secureRequest";
    pub const CLOSE_SESSION: &str = "closeSession";
    pub const CHECK_AVAILABILITY: &str = "checkAvailability";
    pub const CHECK_PAIRING_STATUS: &str = "checkPairingStatus";
}

pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_b64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

/// Decode a base64 field that must hold exactly 32 bytes.
pub fn decode_key32(encoded: &str) -> Option<[u8; 32]> {
    decode_b64(encoded).ok()?.try_into().ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAppIdentityParams {
    pub pairing_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_signing_public_key_encoded: Option<String>,
}

/// The companion's long-term identity as returned during pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    pub signing_public_key: String,
    pub exchange_public_key: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginHandshakeParams {
    pub own_ephemeral_public_key_encoded: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginHandshakeReply {
    pub peer_ephemeral_public_key_encoded: String,
    pub signature_encoded: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishHandshakeParams {
    pub session_id: String,
    pub client_signature_encoded: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishHandshakeReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureRequestParams {
    pub session_id: String,
    pub nonce_encoded: String,
    pub ciphertext_encoded: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureReply {
    pub nonce_encoded: String,
    pub ciphertext_encoded: String,
}

/// Plaintext of an encrypted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurePayload {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Plaintext of an encrypted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSessionParams {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPairingStatusParams {
    pub client_signing_public_key_encoded: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingStatus {
    pub paired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_are_camel_case() {
        let params = SecureRequestParams {
            session_id: "s".into(),
            nonce_encoded: "n".into(),
            ciphertext_encoded: "c".into(),
            sequence: 3,
        };
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"sessionId": "s", "nonceEncoded": "n", "ciphertextEncoded": "c", "sequence": 3})
        );
    }

    #[test]
    fn test_optional_client_key_omitted() {
        let params = GetAppIdentityParams {
            pairing_token: "tok".into(),
            client_signing_public_key_encoded: None,
        };
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"pairingToken": "tok"})
        );
    }

    #[test]
    fn test_decode_key32() {
        assert_eq!(decode_key32(&encode_b64(&[5u8; 32])), Some([5u8; 32]));
        assert_eq!(decode_key32(&encode_b64(&[5u8; 31])), None);
        assert_eq!(decode_key32("***"), None);
    }

    #[test]
    fn test_base64_uses_padding() {
        assert_eq!(encode_b64(b"a"), "YQ==");
    }
}
