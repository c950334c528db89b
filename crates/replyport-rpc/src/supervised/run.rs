use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SupervisorConfig;
use crate::endpoint::{Endpoint, EndpointBuilder};
use crate::error::Result;
use crate::supervised::context::{error_text, ExecutionContext, Launched};
use crate::supervised::{RUN_ERROR, RUN_FINISH};

/// Terminal tag of a supervised unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishReason {
    Done,
    Timeout,
    Error,
    Terminated,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "Done",
            Self::Timeout => "Timeout",
            Self::Error => "Error",
            Self::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single completion event of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub run_id: String,
    pub reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Running,
    Finished(Completion),
}

pub(crate) type CompletionHook = Box<dyn FnOnce(&Completion) + Send>;

enum Report {
    Finished(Value),
    Failed(String),
}

type Outcome = (FinishReason, Option<Value>, Option<String>);

impl Report {
    fn into_outcome(self) -> Outcome {
        match self {
            Self::Finished(value) => (FinishReason::Done, Some(value), None),
            Self::Failed(message) => (FinishReason::Error, None, Some(message)),
        }
    }
}

/// One unit of work in an isolated execution context.
///
/// `Running` moves to exactly one of `Done`, `Timeout`, `Error` or
/// `Terminated`; the context is terminated and the endpoint closed on every
/// path.
#[derive(Clone)]
pub struct SupervisedRun {
    id: Arc<str>,
    kind: &'static str,
    endpoint: Endpoint,
    stop: CancellationToken,
    completion: watch::Receiver<Option<Completion>>,
}

impl SupervisedRun {
    /// Supervise an already launched context. Must be called within a Tokio
    /// runtime.
    pub fn start(id: impl Into<String>, launched: Launched, config: &SupervisorConfig) -> Result<Self> {
        Self::start_with(id.into(), launched, config, None)
    }

    pub(crate) fn start_with(
        id: String,
        launched: Launched,
        config: &SupervisorConfig,
        on_complete: Option<CompletionHook>,
    ) -> Result<Self> {
        let Launched {
            mut context,
            adapter,
            created,
        } = launched;
        let kind = context.kind();
        let endpoint = EndpointBuilder::new(config.endpoint.clone()).build_shared(adapter);

        let (report_tx, reports) = mpsc::unbounded_channel();
        let finished = report_tx.clone();
        endpoint.on(RUN_FINISH, move |_, args| {
            let value = args.into_iter().next().unwrap_or(Value::Null);
            let _ = finished.send(Report::Finished(value));
            async { Ok(Value::Null) }
        });
        endpoint.on(RUN_ERROR, move |_, args| {
            let _ = report_tx.send(Report::Failed(error_text(args.first())));
            async { Ok(Value::Null) }
        });
        if let Err(err) = endpoint.start() {
            context.terminate();
            return Err(err);
        }

        let stop = CancellationToken::new();
        let (completion_tx, completion) = watch::channel(None);
        let deadline = config.effective_deadline();
        debug!(run_id = %id, kind, ?deadline, "supervised run started");

        let monitor = Monitor {
            id: id.clone(),
            context,
            endpoint: endpoint.clone(),
            reports,
            stop: stop.clone(),
            deadline,
            created,
            exit_grace: config.exit_grace,
            completion: completion_tx,
            on_complete,
        };
        tokio::spawn(monitor.run());

        Ok(Self {
            id: id.into(),
            kind,
            endpoint,
            stop,
            completion,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host-side endpoint talking to the context.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Forcibly terminate the context. Returns false if the run had already
    /// finished.
    pub fn stop(&self) -> bool {
        let running = self.is_running();
        self.stop.cancel();
        running
    }

    pub fn state(&self) -> RunState {
        match self.completion.borrow().clone() {
            Some(completion) => RunState::Finished(completion),
            None => RunState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.completion.borrow().is_none()
    }

    /// Wait for the run's completion.
    pub async fn wait(&self) -> Completion {
        let mut rx = self.completion.clone();
        if let Ok(done) = rx.wait_for(Option::is_some).await {
            if let Some(completion) = done.as_ref() {
                return completion.clone();
            }
        }
        Completion {
            run_id: self.id.to_string(),
            reason: FinishReason::Error,
            result: None,
            error_message: Some("supervisor stopped before the run finished".to_string()),
        }
    }
}

impl fmt::Debug for SupervisedRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisedRun")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Owns the context and decides the run's single outcome.
struct Monitor {
    id: String,
    context: Box<dyn ExecutionContext>,
    endpoint: Endpoint,
    reports: mpsc::UnboundedReceiver<Report>,
    stop: CancellationToken,
    deadline: Option<Duration>,
    created: Instant,
    exit_grace: Duration,
    completion: watch::Sender<Option<Completion>>,
    on_complete: Option<CompletionHook>,
}

impl Monitor {
    async fn run(mut self) {
        let deadline = self.deadline;
        let created = self.created;
        let expiry = async move {
            match deadline {
                Some(limit) => tokio::time::sleep_until(created + limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let (reason, result, error_message) = tokio::select! {
            biased;
            _ = self.stop.cancelled() => (FinishReason::Terminated, None, None),
            Some(report) = self.reports.recv() => report.into_outcome(),
            _ = expiry => (
                FinishReason::Timeout,
                None,
                deadline.map(|limit| format!("deadline of {limit:?} exceeded")),
            ),
            exit = self.context.exited() => self.report_within_grace(exit.to_string()).await,
            _ = self.endpoint.closed() => {
                self.report_within_grace("channel closed before the run finished".to_string()).await
            }
        };

        self.context.terminate();
        self.endpoint.close();

        let completion = Completion {
            run_id: self.id,
            reason,
            result,
            error_message,
        };
        match reason {
            FinishReason::Done | FinishReason::Terminated => {
                debug!(run_id = %completion.run_id, %reason, "supervised run finished");
            }
            FinishReason::Timeout | FinishReason::Error => {
                warn!(
                    run_id = %completion.run_id,
                    %reason,
                    error = completion.error_message.as_deref().unwrap_or(""),
                    "supervised run failed"
                );
            }
        }

        if let Some(hook) = self.on_complete.take() {
            hook(&completion);
        }
        self.completion.send_replace(Some(completion));
    }

    /// A finish report can still be in flight when the context or channel
    /// goes away first.
    async fn report_within_grace(&mut self, cause: String) -> Outcome {
        match tokio::time::timeout(self.exit_grace, self.reports.recv()).await {
            Ok(Some(report)) => report.into_outcome(),
            _ => (FinishReason::Error, None, Some(cause)),
        }
    }
}
