//! Channel adapters.
//!
//! Each physical transport is normalized to the same four operations
//! (`start`, `send`, `close`, and inbound delivery through an
//! [`InboundSender`]) so the request/reply layer never needs to know what it
//! is running over:
//! - [`worker_channel`]: in-process duplex pair, one correspondent
//! - [`DuplexPort`]: Unix domain socket to a child process, established by a
//!   [`Bootstrap`] message written to the child's stdin
//! - [`WsAdapter`]: one WebSocket connection (behind the `ws` feature)

pub mod bootstrap;
pub mod error;
pub mod traits;
pub mod worker;

mod lifecycle;

#[cfg(unix)]
pub mod port;
#[cfg(unix)]
pub mod uds;

#[cfg(feature = "ws")]
pub mod ws;

pub use bootstrap::{read_bootstrap, write_bootstrap, Bootstrap};
pub use error::{Result, TransportError};
pub use traits::{ChannelAdapter, CloseReason, Inbound, InboundReceiver, InboundSender};
pub use worker::{worker_channel, WorkerPort};

#[cfg(unix)]
pub use port::{DuplexPort, PeerCredentials};
#[cfg(unix)]
pub use uds::PortListener;

#[cfg(feature = "ws")]
pub use ws::WsAdapter;
