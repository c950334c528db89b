//! Connect-time exchange between an agent and the hub.
//!
//! The agent's first text frame is a `hello` carrying its identity. The hub
//! answers `welcome` with the peer id it registered, or `rejected` followed
//! by a close.

use futures_util::StreamExt;
use replyport_schema::{SchemaRegistry, PEER_IDENTITY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::error::{Result, RpcError};

/// Rejection message for an identity that fails validation.
pub const UNAUTHORIZED: &str = "Unauthorized";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandshakeMessage {
    Hello {
        identity: Value,
    },
    Welcome {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    Rejected {
        message: String,
    },
}

impl HandshakeMessage {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// `None` for anything that is not a handshake frame.
    pub fn from_text(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(message) => Some(message),
            Err(err) => {
                trace!(error = %err, "not a handshake frame");
                None
            }
        }
    }
}

/// Who a peer says it is. Extra fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PeerIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            extra: Map::new(),
        }
    }
}

/// Check a hello identity against the `peer-identity` schema.
pub(crate) fn validate_identity(schemas: &SchemaRegistry, identity: &Value) -> Result<PeerIdentity> {
    if let Err(err) = schemas.validate(PEER_IDENTITY, identity) {
        debug!(error = %err, "identity rejected");
        return Err(RpcError::Unauthorized);
    }
    serde_json::from_value(identity.clone()).map_err(|err| {
        debug!(error = %err, "identity rejected");
        RpcError::Unauthorized
    })
}

/// Next text payload on a socket that has not been handed to an adapter yet.
pub(crate) async fn next_text<S>(ws: &mut WebSocketStream<S>) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text),
            Some(Ok(WsMessage::Binary(bytes))) => {
                return String::from_utf8(bytes)
                    .map_err(|_| RpcError::Handshake("binary frame is not UTF-8".to_string()));
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(RpcError::Handshake(
                    "connection closed during handshake".to_string(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }
}
