//! Supervised, deadline-bounded units of work.
//!
//! A run owns an execution context (a tokio task or a child process) plus
//! the host-side [`Endpoint`] talking to it. The worker reports its outcome
//! with a `run:finish` or `run:error` event; the supervisor turns that, a
//! deadline expiry, a crash, or a stop request into exactly one
//! [`Completion`].

mod context;
mod manager;
#[cfg(unix)]
mod process;
mod run;

use serde_json::Value;
use tracing::trace;

use crate::endpoint::Endpoint;

pub use context::{ContextExit, ExecutionContext, Launched, TaskContext};
pub use manager::Supervisor;
#[cfg(unix)]
pub use process::ProcessContext;
pub use run::{Completion, FinishReason, RunState, SupervisedRun};

/// Event a worker sends with its result.
pub const RUN_FINISH: &str = "run:finish";

/// Event a worker sends when it failed.
pub const RUN_ERROR: &str = "run:error";

/// Report a successful result to the supervising host.
pub fn report_finish(endpoint: &Endpoint, result: Value) {
    if let Err(err) = endpoint.send(RUN_FINISH, vec![result]) {
        trace!(error = %err, "finish report dropped");
    }
}

/// Report a failure to the supervising host.
pub fn report_error(endpoint: &Endpoint, message: &str) {
    if let Err(err) = endpoint.send(RUN_ERROR, vec![Value::String(message.to_string())]) {
        trace!(error = %err, "error report dropped");
    }
}
