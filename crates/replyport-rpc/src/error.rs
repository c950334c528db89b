use std::time::Duration;

use replyport_schema::SchemaError;
use replyport_transport::TransportError;

/// Errors surfaced to callers of an [`Endpoint`](crate::Endpoint) and the
/// variants built on it.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No response arrived before the call's timer fired.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote handler failed; the message is the remote's, verbatim.
    #[error("{0}")]
    Remote(String),

    /// The endpoint was torn down while the call was outstanding, or before
    /// it was issued.
    #[error("channel closed")]
    ChannelClosed,

    /// The addressed peer id has no live connection.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// The peer's identity payload was rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// The configured in-flight cap is reached.
    #[error("too many calls in flight (limit {limit})")]
    TooManyInFlight { limit: usize },

    /// A supervised run with this id is still live.
    #[error("\"{0}\" already running")]
    AlreadyRunning(String),

    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The connect-time exchange did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The execution context could not be created.
    #[error("failed to spawn execution context: {0}")]
    Spawn(String),
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::ChannelClosed,
            other => Self::Transport(other),
        }
    }
}

#[cfg(feature = "hub")]
impl From<tokio_tungstenite::tungstenite::Error> for RpcError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(TransportError::WebSocket(err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_transport_maps_to_channel_closed() {
        assert!(matches!(
            RpcError::from(TransportError::Closed),
            RpcError::ChannelClosed
        ));
        assert!(matches!(
            RpcError::from(TransportError::Bootstrap("x".into())),
            RpcError::Transport(_)
        ));
    }

    #[test]
    fn remote_message_is_verbatim() {
        let err = RpcError::Remote("\"tabs:reload\" doesn't have handler".into());
        assert_eq!(err.to_string(), "\"tabs:reload\" doesn't have handler");
        assert_eq!(
            RpcError::AlreadyRunning("run-1".into()).to_string(),
            "\"run-1\" already running"
        );
    }
}
