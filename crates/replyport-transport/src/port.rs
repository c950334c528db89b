//! Duplex port over a Unix domain socket.
//!
//! Envelopes travel on the [`ENVELOPE`] channel as JSON frames. The
//! [`CONTROL`] channel carries ping/pong and a shutdown notice sent on
//! `close()` so the other side can tell a clean close from a crash.

use std::path::Path;
use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use replyport_frame::{
    ControlMessage, Frame, FrameCodec, FrameConfig, FrameError, Message, CONTROL, CONTROL_PING,
    CONTROL_SHUTDOWN, ENVELOPE,
};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::lifecycle::{lock, Lifecycle};
use crate::traits::{ChannelAdapter, CloseReason, Inbound, InboundSender};

/// Credentials of the process on the other end of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

/// [`ChannelAdapter`] over a connected Unix stream.
pub struct DuplexPort {
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    reader: Mutex<Option<FramedRead<OwnedReadHalf, FrameCodec>>>,
    credentials: Option<PeerCredentials>,
    max_payload: usize,
    lifecycle: Lifecycle,
}

impl DuplexPort {
    /// Wrap a connected stream. Must be called within a Tokio runtime.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self::from_stream_with_config(stream, FrameConfig::default())
    }

    /// Like [`from_stream`](Self::from_stream) with an explicit frame size
    /// limit for both directions.
    pub fn from_stream_with_config(stream: UnixStream, config: FrameConfig) -> Self {
        let max_payload = config.max_payload_size;
        let credentials = stream.peer_cred().ok().map(|cred| PeerCredentials {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        });
        let (read_half, write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

        let lifecycle = Lifecycle::default();
        let writer_config = config.clone();
        // Not tracked by the lifecycle: on close it drains queued frames,
        // including the shutdown notice, before shutting the socket down.
        tokio::spawn(async move {
            let mut sink = FramedWrite::new(write_half, FrameCodec::with_config(writer_config));
            while let Some(frame) = rx.recv().await {
                match sink.send(frame).await {
                    Ok(()) => {}
                    // Nothing was written; the stream is still in sync.
                    Err(e @ FrameError::PayloadTooLarge { .. }) => {
                        warn!(error = %e, "dropping oversized frame");
                    }
                    Err(e) => {
                        debug!(error = %e, "duplex port write failed");
                        return;
                    }
                }
            }
            let _ = sink.close().await;
        });

        Self {
            outbound: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(FramedRead::new(
                read_half,
                FrameCodec::with_config(config),
            ))),
            credentials,
            max_payload,
            lifecycle,
        }
    }

    /// Dial a port bound by [`PortListener`](crate::PortListener).
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to duplex port");
        Ok(Self::from_stream(stream))
    }

    /// Largest envelope payload this port will send or accept.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Credentials reported by the kernel for the connected process.
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        self.credentials
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }
}

impl ChannelAdapter for DuplexPort {
    fn start(&self, inbound: InboundSender) -> Result<()> {
        if !self.lifecycle.begin_start()? {
            return Ok(());
        }
        let Some(mut reader) = lock(&self.reader).take() else {
            return Err(TransportError::Closed);
        };
        let Some(replies) = lock(&self.outbound).clone() else {
            return Err(TransportError::Closed);
        };

        let handle = tokio::spawn(async move {
            let reason = loop {
                match reader.next().await {
                    Some(Ok(frame)) if frame.channel == ENVELOPE => {
                        let Some(message) = Message::decode(&frame.payload) else {
                            continue;
                        };
                        if inbound.send(Inbound::Message(message)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(frame)) if frame.channel == CONTROL => {
                        match ControlMessage::from_bytes(&frame.payload) {
                            Ok(msg) if msg.is(CONTROL_SHUTDOWN) => break CloseReason::Remote,
                            Ok(msg) if msg.is(CONTROL_PING) => {
                                if let Ok(pong) = ControlMessage::pong().to_bytes() {
                                    let _ = replies.send(Frame::new(CONTROL, pong));
                                }
                            }
                            Ok(msg) => trace!(msg_type = %msg.msg_type, "ignoring control message"),
                            Err(e) => trace!(error = %e, "dropping malformed control frame"),
                        }
                    }
                    Some(Ok(frame)) => {
                        trace!(channel = frame.channel, "dropping frame on unknown channel");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "duplex port read failed");
                        break CloseReason::Fault(e.to_string());
                    }
                    None => break CloseReason::Remote,
                }
            };
            debug!(?reason, "duplex port closed");
            let _ = inbound.send(Inbound::Closed(reason));
        });
        self.lifecycle.track(handle);
        Ok(())
    }

    fn send(&self, message: Message) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let payload = message.encode()?;
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            }
            .into());
        }
        self.enqueue(Frame::new(ENVELOPE, payload))
    }

    fn close(&self) {
        if !self.lifecycle.mark_closed() {
            return;
        }
        if let Ok(bytes) = ControlMessage::shutdown(Some("closed")).to_bytes() {
            let _ = self.enqueue(Frame::new(CONTROL, bytes));
        }
        lock(&self.outbound).take();
        lock(&self.reader).take();
        self.lifecycle.abort_all();
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn transport_name(&self) -> &'static str {
        "duplex-port"
    }
}

impl Drop for DuplexPort {
    fn drop(&mut self) {
        self.close();
    }
}
