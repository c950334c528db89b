use serde::{Deserialize, Serialize};

/// CONTROL message type: ping request.
pub const CONTROL_PING: &str = "ping";
/// CONTROL message type: ping response.
pub const CONTROL_PONG: &str = "pong";
/// CONTROL message type: the sender is closing the port.
pub const CONTROL_SHUTDOWN: &str = "shutdown";

/// CONTROL channel message payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ControlMessage {
    pub fn ping() -> Self {
        Self {
            msg_type: CONTROL_PING.to_string(),
            payload: None,
        }
    }

    pub fn pong() -> Self {
        Self {
            msg_type: CONTROL_PONG.to_string(),
            payload: None,
        }
    }

    /// Announce that the sender is closing, with an optional reason.
    pub fn shutdown(reason: Option<&str>) -> Self {
        let payload = reason.map(|reason| serde_json::json!({ "reason": reason }));
        Self {
            msg_type: CONTROL_SHUTDOWN.to_string(),
            payload,
        }
    }

    pub fn is(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_carries_reason() {
        let message = ControlMessage::shutdown(Some("closing"));
        let bytes = message.to_bytes().unwrap();
        let parsed = ControlMessage::from_bytes(&bytes).unwrap();
        assert!(parsed.is(CONTROL_SHUTDOWN));
        assert_eq!(parsed.payload.unwrap()["reason"], "closing");
    }

    #[test]
    fn ping_has_no_payload_on_the_wire() {
        let json = String::from_utf8(ControlMessage::ping().to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }
}
