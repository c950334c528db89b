//! WebSocket adapter.
//!
//! One envelope per text frame. Binary frames are accepted if they hold the
//! same JSON. Anything that does not parse as an envelope is dropped.

use std::sync::Mutex;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use replyport_frame::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::lifecycle::{lock, Lifecycle};
use crate::traits::{ChannelAdapter, CloseReason, Inbound, InboundSender};

/// [`ChannelAdapter`] over an established WebSocket.
pub struct WsAdapter<S> {
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    reader: Mutex<Option<SplitStream<WebSocketStream<S>>>>,
    lifecycle: Lifecycle,
}

impl<S> WsAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a stream whose handshake has completed. Must be called within a
    /// Tokio runtime.
    pub fn new(stream: WebSocketStream<S>) -> Self {
        let (mut sink, reader) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(error = %e, "websocket write failed");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        Self {
            outbound: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(reader)),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Queue a raw text frame, bypassing envelope encoding. Used for the
    /// hub handshake.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.enqueue(WsMessage::Text(text.into()))
    }

    fn enqueue(&self, frame: WsMessage) -> Result<()> {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }
}

impl<S> ChannelAdapter for WsAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn start(&self, inbound: InboundSender) -> Result<()> {
        if !self.lifecycle.begin_start()? {
            return Ok(());
        }
        let Some(mut reader) = lock(&self.reader).take() else {
            return Err(TransportError::Closed);
        };

        let handle = tokio::spawn(async move {
            let reason = loop {
                let decoded = match reader.next().await {
                    Some(Ok(WsMessage::Text(text))) => Message::decode(text.as_bytes()),
                    Some(Ok(WsMessage::Binary(bytes))) => Message::decode(&bytes),
                    Some(Ok(WsMessage::Close(frame))) => {
                        trace!(?frame, "websocket close frame");
                        break CloseReason::Remote;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break CloseReason::Fault(e.to_string()),
                    None => break CloseReason::Remote,
                };
                let Some(message) = decoded else {
                    continue;
                };
                if inbound.send(Inbound::Message(message)).is_err() {
                    return;
                }
            };
            debug!(?reason, "websocket closed");
            let _ = inbound.send(Inbound::Closed(reason));
        });
        self.lifecycle.track(handle);
        Ok(())
    }

    fn send(&self, message: Message) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let text = message.encode_text()?;
        self.enqueue(WsMessage::Text(text))
    }

    fn close(&self) {
        if !self.lifecycle.mark_closed() {
            return;
        }
        lock(&self.outbound).take();
        lock(&self.reader).take();
        self.lifecycle.abort_all();
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn transport_name(&self) -> &'static str {
        "websocket"
    }
}

impl<S> Drop for WsAdapter<S> {
    fn drop(&mut self) {
        if self.lifecycle.mark_closed() {
            lock(&self.outbound).take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (
        WsAdapter<tokio::io::DuplexStream>,
        WsAdapter<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (WsAdapter::new(client), WsAdapter::new(server))
    }

    #[tokio::test]
    async fn envelopes_cross_as_text_frames() {
        let (client, server) = pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.start(tx).unwrap();

        let call = Message::call("getTabs", vec![json!({"window": 1})], "promise::abc12");
        client.send(call.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(Inbound::Message(call)));
    }

    #[tokio::test]
    async fn non_envelope_text_is_dropped() {
        let (client, server) = pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.start(tx).unwrap();

        client.send_text("hello there").unwrap();
        client.send(Message::event("ready", vec![])).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Inbound::Message(Message::event("ready", vec![])))
        );
    }

    #[tokio::test]
    async fn close_reaches_the_other_side() {
        let (client, server) = pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.start(tx).unwrap();

        client.close();
        assert_eq!(rx.recv().await, Some(Inbound::Closed(CloseReason::Remote)));
        assert!(client.send(Message::event("x", vec![])).is_err());
    }
}
