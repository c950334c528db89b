use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use replyport_transport::{worker_channel, ChannelAdapter};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointBuilder};
use crate::handler::HandlerResult;
use crate::panic::panic_message;
use crate::supervised::{report_error, report_finish};

/// How an execution context ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextExit {
    /// Ran to completion; carries the exit code when there is one.
    Exited(Option<i32>),
    /// Host-level failure: panic, crash, wait error.
    Fault(String),
}

impl fmt::Display for ContextExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(Some(code)) => write!(f, "exited with status {code} before finishing"),
            Self::Exited(None) => f.write_str("exited before finishing"),
            Self::Fault(message) => f.write_str(message),
        }
    }
}

/// An isolated unit of execution fronted by a channel adapter.
pub trait ExecutionContext: Send + 'static {
    /// Forcibly stop the context. Safe to call more than once.
    fn terminate(&mut self);

    /// Resolves when the context ends on its own.
    fn exited(&mut self) -> BoxFuture<'_, ContextExit>;

    /// Short label for diagnostics.
    fn kind(&self) -> &'static str;
}

/// A freshly created context and the host side of its channel.
pub struct Launched {
    pub context: Box<dyn ExecutionContext>,
    pub adapter: Arc<dyn ChannelAdapter>,
    /// When creation of the context began; the run's deadline counts from here.
    pub created: Instant,
}

impl fmt::Debug for Launched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launched")
            .field("context", &self.context.kind())
            .field("transport", &self.adapter.transport_name())
            .finish()
    }
}

/// Worker body run inside a tokio task, talking to the host over an
/// in-process worker channel.
///
/// The body receives an endpoint that has not been started yet, so it can
/// register handlers first; `invoke` starts it implicitly, a body that only
/// serves calls should call [`Endpoint::start`]. The body's return value is
/// reported as the run's result.
pub struct TaskContext {
    handle: JoinHandle<()>,
    exit: Option<oneshot::Receiver<ContextExit>>,
}

impl TaskContext {
    pub fn launch<F, Fut>(config: EndpointConfig, body: F) -> Launched
    where
        F: FnOnce(Endpoint) -> Fut + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let created = Instant::now();
        let (host, worker) = worker_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let endpoint = EndpointBuilder::new(config).build(worker);
            let outcome = AssertUnwindSafe(body(endpoint.clone()))
                .catch_unwind()
                .await;
            let exit = match outcome {
                Ok(Ok(value)) => {
                    report_finish(&endpoint, value);
                    ContextExit::Exited(None)
                }
                Ok(Err(message)) => {
                    report_error(&endpoint, &message);
                    ContextExit::Exited(None)
                }
                Err(payload) => {
                    ContextExit::Fault(format!("worker panicked: {}", panic_message(&*payload)))
                }
            };
            let _ = exit_tx.send(exit);
            endpoint.close();
        });

        Launched {
            context: Box::new(Self {
                handle,
                exit: Some(exit_rx),
            }),
            adapter: Arc::new(host),
            created,
        }
    }
}

impl ExecutionContext for TaskContext {
    fn terminate(&mut self) {
        self.handle.abort();
    }

    fn exited(&mut self) -> BoxFuture<'_, ContextExit> {
        Box::pin(async move {
            let Some(rx) = self.exit.as_mut() else {
                return std::future::pending().await;
            };
            let exit = match rx.await {
                Ok(exit) => exit,
                Err(_) => ContextExit::Fault("worker task ended without reporting".to_string()),
            };
            self.exit = None;
            exit
        })
    }

    fn kind(&self) -> &'static str {
        "task"
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Render a reported error argument as a message.
pub(crate) fn error_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Null) | None => "worker reported an error".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exit_descriptions() {
        assert_eq!(
            ContextExit::Exited(Some(3)).to_string(),
            "exited with status 3 before finishing"
        );
        assert_eq!(ContextExit::Fault("segv".into()).to_string(), "segv");
    }

    #[test]
    fn error_text_prefers_strings() {
        assert_eq!(error_text(Some(&json!("bad input"))), "bad input");
        assert_eq!(error_text(Some(&json!({"code": 2}))), r#"{"code":2}"#);
        assert_eq!(error_text(None), "worker reported an error");
    }

    #[tokio::test]
    async fn panicking_body_is_a_fault() {
        let mut launched = TaskContext::launch(EndpointConfig::default(), |_| async {
            let fail = true;
            if fail {
                panic!("worker blew up");
            }
            Ok(Value::Null)
        });
        match launched.context.exited().await {
            ContextExit::Fault(message) => assert!(message.contains("worker blew up")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
