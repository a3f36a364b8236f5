//! JSON messages exchanged with the companion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

/// Error body carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Reply correlated to a [`Request`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the payload or the remote error.
    ///
    /// A failed response without an error body is reported with an empty code.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| RemoteError::new("", "request failed")))
        }
    }
}

/// Unsolicited notification from the companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// How an inbound message should be routed.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Carries an id; routed to the pending request if one matches.
    Reply { id: String, body: Value },
    /// No id but an event marker.
    Event(Event),
    Unroutable,
}

impl Inbound {
    pub(crate) fn classify(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        if let Some(id) = value.get("id").and_then(Value::as_str) {
            return Ok(Inbound::Reply {
                id: id.to_owned(),
                body: value,
            });
        }
        if value.get("event").is_some() {
            return Ok(Inbound::Event(serde_json::from_value(value)?));
        }
        Ok(Inbound::Unroutable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_without_result_defaults_to_null() {
        let r: Response = serde_json::from_value(json!({"id": "a-1", "ok": true})).unwrap();
        assert_eq!(r.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_failed_response_carries_remote_error() {
        let r: Response = serde_json::from_value(json!({
            "id": "a-2",
            "ok": false,
            "error": {"code": "no_session", "message": "gone"}
        }))
        .unwrap();
        assert_eq!(
            r.into_result().unwrap_err(),
            RemoteError::new("no_session", "gone")
        );
    }

    #[test]
    fn test_classify_event() {
        let inbound = Inbound::classify(br#"{"event":"locked","data":{"a":1}}"#).unwrap();
        match inbound {
            Inbound::Event(ev) => assert_eq!(ev.event, "locked"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_reply_and_garbage() {
        assert!(matches!(
            Inbound::classify(br#"{"id":"x-1","ok":true}"#).unwrap(),
            Inbound::Reply { ref id, .. } if id == "x-1"
        ));
        assert!(matches!(
            Inbound::classify(br#"{"hello":"world"}"#).unwrap(),
            Inbound::Unroutable
        ));
        assert!(Inbound::classify(b"not json").is_err());
    }
}
