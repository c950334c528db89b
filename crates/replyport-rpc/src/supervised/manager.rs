use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, RpcError};
use crate::handler::HandlerResult;
use crate::supervised::context::{Launched, TaskContext};
use crate::supervised::run::{Completion, SupervisedRun};
use crate::sync::lock;

const COMPLETION_CAPACITY: usize = 64;

/// Keeps at most one live run per id and announces completions.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    runs: Mutex<HashMap<String, Slot>>,
    completions: broadcast::Sender<Completion>,
    next_seq: AtomicU64,
}

struct Slot {
    seq: u64,
    run: SupervisedRun,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                runs: Mutex::new(HashMap::new()),
                completions,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Completion events of every run started after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.inner.completions.subscribe()
    }

    /// Run `body` in a task context.
    pub fn run_task<F, Fut>(&self, id: impl Into<String>, body: F) -> Result<SupervisedRun>
    where
        F: FnOnce(Endpoint) -> Fut + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = id.into();
        if self.is_running(&id) {
            return Err(RpcError::AlreadyRunning(id));
        }
        let config = self.inner.config.endpoint.clone();
        self.start(id, TaskContext::launch(config, body))
    }

    /// Spawn `command` as a child process and supervise it.
    #[cfg(unix)]
    pub async fn run_process(
        &self,
        id: impl Into<String>,
        command: tokio::process::Command,
        payload: serde_json::Value,
    ) -> Result<SupervisedRun> {
        let id = id.into();
        if self.is_running(&id) {
            return Err(RpcError::AlreadyRunning(id));
        }
        let launched = crate::supervised::ProcessContext::launch(
            command,
            payload,
            self.inner.config.connect_timeout,
        )
        .await?;
        self.start(id, launched)
    }

    /// Supervise an already launched context under `id`. A duplicate id
    /// terminates the new context and fails.
    pub fn start(&self, id: impl Into<String>, mut launched: Launched) -> Result<SupervisedRun> {
        let id = id.into();
        let mut runs = lock(&self.inner.runs);
        if runs.contains_key(&id) {
            launched.context.terminate();
            return Err(RpcError::AlreadyRunning(id));
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);
        let hook = Box::new(move |completion: &Completion| finish(&weak, seq, completion));
        let run = SupervisedRun::start_with(id.clone(), launched, &self.inner.config, Some(hook))?;
        runs.insert(
            id,
            Slot {
                seq,
                run: run.clone(),
            },
        );
        Ok(run)
    }

    /// Terminate the run with `id`. False if no such run is live.
    pub fn stop(&self, id: &str) -> bool {
        let run = lock(&self.inner.runs).get(id).map(|slot| slot.run.clone());
        run.is_some_and(|run| run.stop())
    }

    pub fn get(&self, id: &str) -> Option<SupervisedRun> {
        lock(&self.inner.runs).get(id).map(|slot| slot.run.clone())
    }

    /// Ids of live runs, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.runs).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.inner.runs).contains_key(id)
    }

    /// Terminate every live run. Returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        let runs: Vec<SupervisedRun> = lock(&self.inner.runs)
            .values()
            .map(|slot| slot.run.clone())
            .collect();
        runs.iter().filter(|run| run.stop()).count()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("running", &self.running())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Runs on the monitor task before the completion is published, so the id is
/// free again by the time `wait` returns.
fn finish(inner: &Weak<Inner>, seq: u64, completion: &Completion) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut runs = lock(&inner.runs);
        if runs
            .get(&completion.run_id)
            .is_some_and(|slot| slot.seq == seq)
        {
            runs.remove(&completion.run_id);
        }
    }
    debug!(run_id = %completion.run_id, reason = %completion.reason, "run slot released");
    let _ = inner.completions.send(completion.clone());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::config::EndpointConfig;
    use crate::supervised::FinishReason;

    #[tokio::test]
    async fn completion_is_broadcast_and_slot_released() {
        let supervisor = Supervisor::new(SupervisorConfig::default());
        let mut events = supervisor.subscribe();
        let run = supervisor
            .run_task("run-1", |_| async { Ok(json!("done")) })
            .unwrap();

        let completion = run.wait().await;
        assert_eq!(completion.reason, FinishReason::Done);
        assert!(!supervisor.is_running("run-1"));

        let event = events.recv().await.unwrap();
        assert_eq!(event, completion);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_until_finished() {
        let supervisor = Supervisor::new(SupervisorConfig::default());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let first = supervisor
            .run_task("run-1", |_| async move {
                let _ = release_rx.await;
                Ok(Value::Null)
            })
            .unwrap();

        let err = supervisor
            .run_task("run-1", |_| async { Ok(Value::Null) })
            .unwrap_err();
        assert!(matches!(err, RpcError::AlreadyRunning(_)));
        assert_eq!(err.to_string(), "\"run-1\" already running");

        let duplicate = TaskContext::launch(EndpointConfig::default(), |_| async { Ok(Value::Null) });
        assert!(supervisor.start("run-1", duplicate).is_err());
        assert_eq!(supervisor.running(), vec!["run-1".to_string()]);

        release_tx.send(()).unwrap();
        first.wait().await;
        let again = supervisor
            .run_task("run-1", |_| async { Ok(json!(2)) })
            .unwrap();
        assert_eq!(again.wait().await.result, Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_late_finish_yield_one_completion() {
        let supervisor = Supervisor::new(
            SupervisorConfig::default().with_deadline(Some(Duration::from_millis(100))),
        );
        let mut events = supervisor.subscribe();
        let run = supervisor
            .run_task("race", |_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("late"))
            })
            .unwrap();

        let completion = run.wait().await;
        assert!(matches!(
            completion.reason,
            FinishReason::Timeout | FinishReason::Done
        ));
        assert_eq!(events.recv().await.unwrap(), completion);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(run.wait().await, completion);
    }

    #[tokio::test]
    async fn stop_unknown_or_all() {
        let supervisor = Supervisor::new(SupervisorConfig::default());
        assert!(!supervisor.stop("missing"));

        for id in ["a", "b"] {
            supervisor
                .run_task(id, |_| async {
                    std::future::pending::<()>().await;
                    Ok(Value::Null)
                })
                .unwrap();
        }
        assert_eq!(supervisor.running(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(supervisor.stop_all(), 2);

        let run = supervisor.get("a");
        if let Some(run) = run {
            assert_eq!(run.wait().await.reason, FinishReason::Terminated);
        }
        while !supervisor.running().is_empty() {
            tokio::task::yield_now().await;
        }
    }
}
