//! Channel IDs used on byte-stream transports.
//!
//! A duplex port carries two logical channels: CONTROL for connection
//! management and ENVELOPE for the request/reply protocol itself.

/// Connection management (ping/pong, shutdown).
pub const CONTROL: u16 = 0;

/// Envelope traffic (calls, responses, events).
pub const ENVELOPE: u16 = 1;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        ENVELOPE => "ENVELOPE",
        _ => "UNKNOWN",
    }
}

/// Returns true if the channel ID is one this crate understands.
pub fn is_known(id: u16) -> bool {
    id <= ENVELOPE
}
