use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in channel adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// No connection arrived before the accept deadline.
    #[error("no connection accepted within {0:?}")]
    AcceptTimeout(Duration),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Framing or envelope encoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] replyport_frame::FrameError),

    /// The bootstrap message was missing or malformed.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// WebSocket protocol error.
    #[cfg(feature = "ws")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The channel has been closed locally or the remote half is gone.
    #[error("channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
