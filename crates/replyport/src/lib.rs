//! Reliable request/reply over unreliable message channels.
//!
//! replyport turns fire-and-forget message channels into an asynchronous
//! request/reply protocol with timeouts, cancellation, and typed errors.
//!
//! # Crate Structure
//!
//! - [`frame`]: Envelope shape, tagged messages, byte-stream framing
//! - [`transport`]: Channel adapters (worker channel, Unix duplex port, WebSocket)
//! - [`schema`]: JSON Schema validation of call arguments and peer identities
//! - [`rpc`]: Endpoints, supervised runs, and the peer hub

/// Re-export frame types.
pub mod frame {
    pub use replyport_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use replyport_transport::*;
}

/// Re-export schema types.
pub mod schema {
    pub use replyport_schema::*;
}

/// Re-export request/reply types.
pub mod rpc {
    pub use replyport_rpc::*;
}

pub use replyport_rpc::{Endpoint, EndpointConfig, HandlerTable, Result, RpcError};
