use std::time::Duration;

use futures_util::SinkExt;
use replyport_transport::WsAdapter;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointBuilder};
use crate::error::{Result, RpcError};
use crate::handler::HandlerTable;
use crate::hub::handshake::{next_text, HandshakeMessage, PeerIdentity, UNAUTHORIZED};
use crate::hub::DEFAULT_HANDSHAKE_TIMEOUT;

/// Peer side of a [`Hub`](crate::hub::Hub) connection.
#[derive(Debug, Clone)]
pub struct Agent {
    identity: PeerIdentity,
    config: EndpointConfig,
    handlers: Option<HandlerTable>,
    handshake_timeout: Duration,
}

impl Agent {
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            config: EndpointConfig::default(),
            handlers: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Handlers in place before the first hub call can arrive.
    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Connect to `url`, present the identity, and return the started
    /// endpoint. A rejected identity fails with [`RpcError::Unauthorized`].
    pub async fn connect(&self, url: &str) -> Result<Endpoint> {
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
        let hello = HandshakeMessage::Hello {
            identity: serde_json::to_value(&self.identity)?,
        };
        ws.send(WsMessage::Text(hello.to_text()?)).await?;

        let reply = tokio::time::timeout(self.handshake_timeout, next_text(&mut ws))
            .await
            .map_err(|_| RpcError::Handshake("timed out waiting for welcome".to_string()))??;
        match HandshakeMessage::from_text(&reply) {
            Some(HandshakeMessage::Welcome { peer_id }) => {
                debug!(%url, peer = %peer_id, "connected to hub");
            }
            Some(HandshakeMessage::Rejected { message }) if message == UNAUTHORIZED => {
                return Err(RpcError::Unauthorized);
            }
            Some(HandshakeMessage::Rejected { message }) => {
                return Err(RpcError::Handshake(message));
            }
            _ => {
                return Err(RpcError::Handshake("unexpected handshake reply".to_string()));
            }
        }

        let mut builder = EndpointBuilder::new(self.config.clone());
        if let Some(handlers) = &self.handlers {
            builder = builder.with_handlers(handlers.clone());
        }
        builder.start(WsAdapter::new(ws))
    }
}
