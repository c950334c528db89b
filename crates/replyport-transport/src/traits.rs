use replyport_frame::Message;
use tokio::sync::mpsc;

use crate::error::Result;

/// Why an adapter stopped delivering messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called on this side.
    Local,
    /// The remote half closed or went away.
    Remote,
    /// The transport failed.
    Fault(String),
}

/// One item delivered by an adapter after `start()`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    /// Always the last item an adapter delivers.
    Closed(CloseReason),
}

pub type InboundSender = mpsc::UnboundedSender<Inbound>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// A physical transport normalized to start / send / receive / close.
///
/// Implementations must uphold:
/// - `start` is idempotent; only the first call installs the inbound sender.
/// - `send` only enqueues and never waits on I/O.
/// - after `close`, `send` fails with [`TransportError::Closed`](crate::TransportError::Closed).
/// - `close` is safe to call more than once.
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Begin delivering inbound messages to `inbound`.
    fn start(&self, inbound: InboundSender) -> Result<()>;

    /// Enqueue one outbound message.
    fn send(&self, message: Message) -> Result<()>;

    /// Unregister listeners and release the underlying resource.
    fn close(&self);

    /// True once `close` has been called.
    fn is_closed(&self) -> bool;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
