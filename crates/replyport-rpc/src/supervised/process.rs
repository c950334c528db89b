use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use replyport_transport::{write_bootstrap, Bootstrap, PortListener};
use serde_json::Value;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Result, RpcError};
use crate::supervised::context::{ContextExit, ExecutionContext, Launched};

/// A child process connected back over a duplex port.
///
/// The parent binds a port, spawns the child with a piped stdin, writes the
/// bootstrap line naming the port, and waits for the child to dial in.
pub struct ProcessContext {
    child: Child,
    // Held open; some children treat stdin EOF as a shutdown request.
    _stdin: Option<ChildStdin>,
}

impl ProcessContext {
    pub async fn launch(
        mut command: Command,
        payload: Value,
        connect_timeout: Duration,
    ) -> Result<Launched> {
        let created = Instant::now();
        let listener = PortListener::bind_temp()?;
        command.stdin(Stdio::piped()).kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|err| RpcError::Spawn(err.to_string()))?;

        let Some(mut stdin) = child.stdin.take() else {
            let _ = child.start_kill();
            return Err(RpcError::Spawn("child stdin is not piped".to_string()));
        };
        let bootstrap = Bootstrap::new(listener.path(), payload);
        if let Err(err) = write_bootstrap(&mut stdin, &bootstrap).await {
            let _ = child.start_kill();
            return Err(err.into());
        }

        let accepted = tokio::select! {
            port = listener.accept_timeout(connect_timeout) => port,
            status = child.wait() => {
                let detail = match status {
                    Ok(status) => format!("child exited ({status}) before connecting"),
                    Err(err) => format!("child wait failed: {err}"),
                };
                return Err(RpcError::Spawn(detail));
            }
        };
        let port = match accepted {
            Ok(port) => port,
            Err(err) => {
                let _ = child.start_kill();
                return Err(err.into());
            }
        };

        let pid = child.id();
        match port.peer_credentials().and_then(|creds| creds.pid) {
            Some(peer) if pid.map(|p| p as i32) != Some(peer) => {
                warn!(?pid, peer, "duplex port dialed by a process other than the child");
            }
            _ => {}
        }
        debug!(?pid, path = ?listener.path(), "supervised process connected");

        Ok(Launched {
            context: Box::new(Self {
                child,
                _stdin: Some(stdin),
            }),
            adapter: Arc::new(port),
            created,
        })
    }

    /// OS process id, while the child has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl ExecutionContext for ProcessContext {
    fn terminate(&mut self) {
        self._stdin = None;
        if let Err(err) = self.child.start_kill() {
            trace!(error = %err, "kill after exit");
        }
    }

    fn exited(&mut self) -> BoxFuture<'_, ContextExit> {
        Box::pin(async move {
            match self.child.wait().await {
                Ok(status) => ContextExit::Exited(status.code()),
                Err(err) => ContextExit::Fault(format!("child wait failed: {err}")),
            }
        })
    }

    fn kind(&self) -> &'static str {
        "process"
    }
}
