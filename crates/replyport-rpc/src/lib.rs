//! Correlation-based request/reply over unreliable message channels.
//!
//! An [`Endpoint`] turns any [`ChannelAdapter`](replyport_transport::ChannelAdapter)
//! into a request/reply protocol: `invoke` parks a call in the
//! [`CallRegistry`] until its response, timeout, or the endpoint's teardown
//! settles it exactly once; inbound calls and events are dispatched to a
//! [`HandlerTable`].
//!
//! Two variants are built on top:
//! - [`supervised`]: deadline-bounded runs in isolated tasks or child
//!   processes, each ending with exactly one [`Completion`]
//! - [`hub`]: many WebSocket peers addressed by id (behind the `hub` feature)

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod registry;
pub mod supervised;

#[cfg(feature = "hub")]
pub mod hub;

mod id;
mod panic;
mod sync;

pub use config::{
    EndpointConfig, IdStrategy, SupervisorConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_EXIT_GRACE, INTERACTIVE_DEADLINE, SCRIPT_DEADLINE,
};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{Result, RpcError};
pub use handler::{CallContext, Handler, HandlerResult, HandlerTable};
pub use id::RANDOM_ID_PREFIX;
pub use registry::{CallRegistry, PendingInfo};
pub use supervised::{
    report_error, report_finish, Completion, ContextExit, ExecutionContext, FinishReason,
    Launched, RunState, SupervisedRun, Supervisor, TaskContext, RUN_ERROR, RUN_FINISH,
};

#[cfg(unix)]
pub use supervised::ProcessContext;

#[cfg(feature = "hub")]
pub use hub::{Agent, Hub, HubConfig, PeerEvent, PeerEventKind, PeerIdentity};
