use serde_json::Value;
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::Result;

/// A classified envelope.
///
/// Transports convert raw envelopes into this union at their boundary, so
/// dispatch is a total match instead of a sequence of shape checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An addressed call expecting exactly one response.
    Call {
        name: String,
        args: Vec<Value>,
        correlation_id: String,
    },
    /// The response to a call. `Err` carries the remote error message.
    Response {
        name: String,
        correlation_id: String,
        outcome: std::result::Result<Value, String>,
    },
    /// Fire-and-forget; no reply is expected.
    Event { name: String, args: Vec<Value> },
}

impl Message {
    pub fn call(name: impl Into<String>, args: Vec<Value>, correlation_id: impl Into<String>) -> Self {
        Self::Call {
            name: name.into(),
            args,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            name: name.into(),
            args,
        }
    }

    pub fn response(
        name: impl Into<String>,
        correlation_id: impl Into<String>,
        outcome: std::result::Result<Value, String>,
    ) -> Self {
        Self::Response {
            name: name.into(),
            correlation_id: correlation_id.into(),
            outcome,
        }
    }

    /// Call or event name.
    pub fn name(&self) -> &str {
        match self {
            Self::Call { name, .. } | Self::Response { name, .. } | Self::Event { name, .. } => {
                name
            }
        }
    }

    /// Correlation id, absent on events.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Call { correlation_id, .. } | Self::Response { correlation_id, .. } => {
                Some(correlation_id)
            }
            Self::Event { .. } => None,
        }
    }

    /// Classify a raw envelope. Returns `None` for foreign or malformed traffic.
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        if envelope.name.is_empty() {
            return None;
        }

        match envelope.message_id {
            Some(correlation_id) if envelope.result.is_some() || envelope.error.is_some() => {
                let outcome = if envelope.error.unwrap_or(false) {
                    Err(envelope.error_message.unwrap_or_default())
                } else {
                    Ok(envelope.result.unwrap_or(Value::Null))
                };
                Some(Self::Response {
                    name: envelope.name,
                    correlation_id,
                    outcome,
                })
            }
            Some(correlation_id) => Some(Self::Call {
                name: envelope.name,
                args: envelope.args,
                correlation_id,
            }),
            None => Some(Self::Event {
                name: envelope.name,
                args: envelope.args,
            }),
        }
    }

    /// Lower into the wire shape.
    pub fn into_envelope(self) -> Envelope {
        match self {
            Self::Call {
                name,
                args,
                correlation_id,
            } => Envelope {
                name,
                args,
                message_id: Some(correlation_id),
                result: None,
                error: None,
                error_message: None,
            },
            Self::Response {
                name,
                correlation_id,
                outcome,
            } => {
                let (result, error, error_message) = match outcome {
                    Ok(value) => (Some(value), None, None),
                    Err(message) => (None, Some(true), Some(message)),
                };
                Envelope {
                    name,
                    args: Vec::new(),
                    message_id: Some(correlation_id),
                    result,
                    error,
                    error_message,
                }
            }
            Self::Event { name, args } => Envelope {
                name,
                args,
                message_id: None,
                result: None,
                error: None,
                error_message: None,
            },
        }
    }

    /// Classify an arbitrary JSON value.
    pub fn from_value(value: Value) -> Option<Self> {
        match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) => Self::from_envelope(envelope),
            Err(err) => {
                trace!(error = %err, "dropping non-envelope value");
                None
            }
        }
    }

    /// Decode JSON bytes. Malformed payloads yield `None`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Envelope>(bytes) {
            Ok(envelope) => Self::from_envelope(envelope),
            Err(err) => {
                trace!(error = %err, size = bytes.len(), "dropping malformed envelope");
                None
            }
        }
    }

    /// Encode as JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.clone().into_envelope())?)
    }

    /// Encode as a JSON string.
    pub fn encode_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.clone().into_envelope())?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_call_response_and_event() {
        let call = Message::from_value(json!({
            "name": "tabs:reload", "args": [{"tabId": 7}], "messageId": "1"
        }))
        .unwrap();
        assert!(matches!(call, Message::Call { ref correlation_id, .. } if correlation_id == "1"));

        let response = Message::from_value(json!({
            "name": "tabs:reload", "args": [], "messageId": "1", "result": {}
        }))
        .unwrap();
        assert_eq!(
            response,
            Message::response("tabs:reload", "1", Ok(json!({})))
        );

        let event = Message::from_value(json!({"name": "log", "args": ["hi"]})).unwrap();
        assert_eq!(event, Message::event("log", vec![json!("hi")]));
    }

    #[test]
    fn error_flag_makes_error_response() {
        let message = Message::from_value(json!({
            "name": "x", "messageId": "9", "error": true, "errorMessage": "nope"
        }))
        .unwrap();
        assert_eq!(message, Message::response("x", "9", Err("nope".to_string())));
    }

    #[test]
    fn error_false_with_result_is_success() {
        let message = Message::from_value(json!({
            "name": "x", "messageId": "9", "error": false, "result": 3
        }))
        .unwrap();
        assert_eq!(message, Message::response("x", "9", Ok(json!(3))));
    }

    #[test]
    fn malformed_traffic_is_dropped() {
        assert!(Message::from_value(json!({"args": []})).is_none());
        assert!(Message::from_value(json!({"name": ""})).is_none());
        assert!(Message::from_value(json!({"name": 5})).is_none());
        assert!(Message::from_value(json!("just a string")).is_none());
        assert!(Message::from_value(json!({"name": "x", "args": "not-an-array"})).is_none());
        assert!(Message::decode(b"{not json").is_none());
    }

    #[test]
    fn error_response_lowers_to_wire_shape() {
        let wire = serde_json::to_value(
            Message::response("x", "2", Err("x doesn't have handler".to_string())).into_envelope(),
        )
        .unwrap();
        assert_eq!(
            wire,
            json!({
                "name": "x",
                "args": [],
                "messageId": "2",
                "error": true,
                "errorMessage": "x doesn't have handler"
            })
        );
    }

    #[test]
    fn decode_accepts_encoded_call() {
        let call = Message::call("sum", vec![json!(1), json!(2)], "42");
        let bytes = call.encode().unwrap();
        assert_eq!(Message::decode(&bytes), Some(call));
    }
}
