//! The wire layer of replyport.
//!
//! Everything that crosses a transport boundary is defined here:
//! - [`Envelope`], the JSON shape consumers rely on bit-for-bit
//! - [`Message`], the closed Call / Response / Event union the rest of the
//!   workspace dispatches on
//! - length-prefixed framing for byte-stream transports, with a 2-byte magic,
//!   a 4-byte little-endian length and a 2-byte little-endian channel id
//! - [`ControlMessage`] payloads carried on the CONTROL channel

pub mod channel;
pub mod codec;
pub mod control;
pub mod envelope;
pub mod error;
pub mod message;

pub use channel::{CONTROL, ENVELOPE};
pub use codec::{
    decode_frame, encode_frame, Frame, FrameCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use control::{ControlMessage, CONTROL_PING, CONTROL_PONG, CONTROL_SHUTDOWN};
pub use envelope::Envelope;
pub use error::{FrameError, Result};
pub use message::Message;
