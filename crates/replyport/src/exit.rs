use std::fmt;
use std::io;

use replyport_rpc::{FinishReason, RpcError};
use replyport_transport::TransportError;

// Exit code constants aligned with the sysexits-style table used by the CLI.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::AcceptTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Bootstrap(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Unauthorized => CliError::new(PERMISSION_DENIED, format!("{context}: {err}")),
        RpcError::Schema(_) | RpcError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        RpcError::Handshake(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        RpcError::Remote(_)
        | RpcError::ChannelClosed
        | RpcError::PeerNotConnected(_)
        | RpcError::TooManyInFlight { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        RpcError::AlreadyRunning(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Exit code for a supervised run's finish reason.
pub fn finish_code(reason: FinishReason) -> i32 {
    match reason {
        FinishReason::Done => SUCCESS,
        FinishReason::Timeout => TIMEOUT,
        FinishReason::Error | FinishReason::Terminated => FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rpc_errors_map_to_exit_codes() {
        assert_eq!(rpc_error("x", RpcError::Timeout(Duration::from_secs(1))).code, TIMEOUT);
        assert_eq!(rpc_error("x", RpcError::Unauthorized).code, PERMISSION_DENIED);
        assert_eq!(rpc_error("x", RpcError::Remote("boom".into())).code, FAILURE);
        assert_eq!(
            rpc_error("x", RpcError::Transport(TransportError::Bootstrap("bad".into()))).code,
            DATA_INVALID
        );
        assert_eq!(rpc_error("x", RpcError::Spawn("no such file".into())).code, INTERNAL);
    }

    #[test]
    fn finish_reasons_map_to_exit_codes() {
        assert_eq!(finish_code(FinishReason::Done), SUCCESS);
        assert_eq!(finish_code(FinishReason::Timeout), TIMEOUT);
        assert_eq!(finish_code(FinishReason::Terminated), FAILURE);
    }
}
