//! Bootstrap message for supervised children.
//!
//! The supervisor writes one JSON line to the child's stdin naming the
//! duplex port to dial and an arbitrary startup payload:
//!
//! ```json
//! {"type":"start","port":"/tmp/replyport-1234.sock","payload":{"script":"build"}}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransportError};

/// Expected `type` value of a bootstrap line.
pub const BOOTSTRAP_TYPE: &str = "start";

/// Upper bound on the bootstrap line, including the newline.
pub const MAX_BOOTSTRAP_LEN: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub port: PathBuf,
    #[serde(default)]
    pub payload: Value,
}

impl Bootstrap {
    pub fn new(port: impl Into<PathBuf>, payload: Value) -> Self {
        Self {
            msg_type: BOOTSTRAP_TYPE.to_string(),
            port: port.into(),
            payload,
        }
    }
}

/// Write `bootstrap` as one newline-terminated JSON line and flush.
pub async fn write_bootstrap<W>(writer: &mut W, bootstrap: &Bootstrap) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(bootstrap)
        .map_err(|e| TransportError::Bootstrap(format!("encode: {e}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the bootstrap line from `reader` (normally the child's stdin).
pub async fn read_bootstrap<R>(reader: &mut R) -> Result<Bootstrap>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .take(MAX_BOOTSTRAP_LEN)
        .read_line(&mut line)
        .await?;
    if read == 0 {
        return Err(TransportError::Bootstrap(
            "input closed before bootstrap line".to_string(),
        ));
    }
    if !line.ends_with('\n') && read as u64 >= MAX_BOOTSTRAP_LEN {
        return Err(TransportError::Bootstrap(format!(
            "bootstrap line exceeds {MAX_BOOTSTRAP_LEN} bytes"
        )));
    }

    let bootstrap: Bootstrap = serde_json::from_str(line.trim_end())
        .map_err(|e| TransportError::Bootstrap(format!("invalid bootstrap line: {e}")))?;
    if bootstrap.msg_type != BOOTSTRAP_TYPE {
        return Err(TransportError::Bootstrap(format!(
            "unexpected bootstrap type {:?}",
            bootstrap.msg_type
        )));
    }
    Ok(bootstrap)
}
