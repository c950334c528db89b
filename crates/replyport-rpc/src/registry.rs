//! Correlation registry: the map of outstanding calls.
//!
//! Every terminal path (response, timeout, caller cancellation, teardown)
//! removes the entry under the lock before settling it, so whichever path
//! gets there first wins and the rest become no-ops.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::IdStrategy;
use crate::error::{Result, RpcError};
use crate::id::IdGenerator;
use crate::sync::lock;

pub(crate) type Settlement = std::result::Result<Value, RpcError>;

struct PendingCall {
    name: String,
    sender: oneshot::Sender<Settlement>,
    issued_at: Instant,
}

#[derive(Default)]
struct State {
    calls: HashMap<String, PendingCall>,
    closed: bool,
}

/// Snapshot of one outstanding call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub correlation_id: String,
    pub name: String,
    pub age: Duration,
}

/// Outstanding calls of one endpoint, keyed by correlation id.
pub struct CallRegistry {
    state: Mutex<State>,
    ids: IdGenerator,
    max_in_flight: Option<usize>,
}

impl CallRegistry {
    pub fn new(strategy: IdStrategy, max_in_flight: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids: IdGenerator::new(strategy),
            max_in_flight,
        }
    }

    /// Reserve a fresh correlation id for a call to `name`.
    ///
    /// Fails with [`RpcError::ChannelClosed`] once the registry is closed and
    /// with [`RpcError::TooManyInFlight`] when the cap is reached.
    pub(crate) fn register(&self, name: &str) -> Result<(String, oneshot::Receiver<Settlement>)> {
        self.register_with(name, || self.ids.next_id())
    }

    fn register_with(
        &self,
        name: &str,
        mut next_id: impl FnMut() -> String,
    ) -> Result<(String, oneshot::Receiver<Settlement>)> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(RpcError::ChannelClosed);
        }
        if let Some(limit) = self.max_in_flight {
            if state.calls.len() >= limit {
                return Err(RpcError::TooManyInFlight { limit });
            }
        }

        let mut id = next_id();
        while state.calls.contains_key(&id) {
            debug!(correlation_id = %id, "correlation id collides with a live call; redrawing");
            id = next_id();
        }

        let (sender, receiver) = oneshot::channel();
        state.calls.insert(
            id.clone(),
            PendingCall {
                name: name.to_string(),
                sender,
                issued_at: Instant::now(),
            },
        );
        Ok((id, receiver))
    }

    /// Route a response to its call. Returns false when no live entry
    /// matches, which is the case for late or foreign responses.
    pub fn settle(&self, correlation_id: &str, outcome: std::result::Result<Value, String>) -> bool {
        let Some(call) = lock(&self.state).calls.remove(correlation_id) else {
            warn!(correlation_id, "dropping response for unknown or settled call");
            return false;
        };
        let settlement = outcome.map_err(RpcError::Remote);
        if call.sender.send(settlement).is_err() {
            debug!(correlation_id, name = %call.name, "caller went away before response");
        }
        true
    }

    /// Drop an entry without settling it. Returns whether it was live.
    pub fn remove(&self, correlation_id: &str) -> bool {
        lock(&self.state).calls.remove(correlation_id).is_some()
    }

    /// Reject every live call with [`RpcError::ChannelClosed`] and refuse new
    /// ones. Returns the number of calls rejected; repeat calls return 0.
    pub fn close(&self) -> usize {
        let drained: Vec<(String, PendingCall)> = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.calls.drain().collect()
        };
        let count = drained.len();
        for (_, call) in drained {
            let _ = call.sender.send(Err(RpcError::ChannelClosed));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live calls, oldest first.
    pub fn pending(&self) -> Vec<PendingInfo> {
        let now = Instant::now();
        let mut pending: Vec<PendingInfo> = lock(&self.state)
            .calls
            .iter()
            .map(|(id, call)| PendingInfo {
                correlation_id: id.clone(),
                name: call.name.clone(),
                age: now.saturating_duration_since(call.issued_at),
            })
            .collect();
        pending.sort_by(|a, b| b.age.cmp(&a.age));
        pending
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("CallRegistry")
            .field("in_flight", &state.calls.len())
            .field("closed", &state.closed)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn settle_resolves_once() {
        let registry = CallRegistry::new(IdStrategy::Counter, None);
        let (id, rx) = registry.register("add").unwrap();
        assert_eq!(id, "1");

        assert!(registry.settle(&id, Ok(json!(3))));
        assert!(!registry.settle(&id, Ok(json!(4))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(3));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remote_error_carries_message() {
        let registry = CallRegistry::new(IdStrategy::Counter, None);
        let (id, rx) = registry.register("boom").unwrap();
        registry.settle(&id, Err("kaboom".into()));
        assert!(matches!(rx.await.unwrap(), Err(RpcError::Remote(m)) if m == "kaboom"));
    }

    #[test]
    fn removed_entry_ignores_late_response() {
        let registry = CallRegistry::new(IdStrategy::Counter, None);
        let (id, _rx) = registry.register("slow").unwrap();
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(!registry.settle(&id, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn close_rejects_all_and_refuses_new() {
        let registry = CallRegistry::new(IdStrategy::Random, None);
        let receivers: Vec<_> = (0..3).map(|_| registry.register("x").unwrap().1).collect();

        assert_eq!(registry.close(), 3);
        assert_eq!(registry.close(), 0);
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(RpcError::ChannelClosed)));
        }
        assert!(matches!(registry.register("y"), Err(RpcError::ChannelClosed)));
    }

    #[test]
    fn cap_limits_in_flight() {
        let registry = CallRegistry::new(IdStrategy::Counter, Some(2));
        let _a = registry.register("a").unwrap();
        let (b, _rx) = registry.register("b").unwrap();
        assert!(matches!(
            registry.register("c"),
            Err(RpcError::TooManyInFlight { limit: 2 })
        ));
        registry.remove(&b);
        assert!(registry.register("c").is_ok());
    }

    #[test]
    fn colliding_ids_are_redrawn() {
        let registry = CallRegistry::new(IdStrategy::Counter, None);
        let mut draws = vec!["b", "a", "a"];
        let (first, _rx1) = registry
            .register_with("x", || draws.pop().unwrap().to_string())
            .unwrap();
        let (second, _rx2) = registry
            .register_with("x", || draws.pop().unwrap().to_string())
            .unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, "b");
        assert!(draws.is_empty());
    }

    #[test]
    fn pending_snapshot_lists_live_calls() {
        let registry = CallRegistry::new(IdStrategy::Counter, None);
        let _a = registry.register("first").unwrap();
        let _b = registry.register("second").unwrap();
        let mut names: Vec<String> = registry.pending().into_iter().map(|p| p.name).collect();
        names.sort();
        assert_eq!(names, vec!["first", "second"]);
    }
}
