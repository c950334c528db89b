use std::sync::Arc;
use std::time::Duration;

use replyport_schema::SchemaRegistry;

/// Default per-call timeout for control calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How an endpoint mints correlation ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// `"1"`, `"2"`, ... for an endpoint that is the only id writer on its
    /// channel.
    #[default]
    Counter,
    /// `promise::<token>` for channels shared by independent writers.
    Random,
}

/// Endpoint behavior knobs.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Timeout applied by `invoke` when none is given.
    pub call_timeout: Duration,
    /// Optional cap on concurrently outstanding calls.
    pub max_in_flight: Option<usize>,
    pub id_strategy: IdStrategy,
    /// When set, inbound call arguments are validated against the schema
    /// named after the call, if one is registered.
    pub schemas: Option<Arc<SchemaRegistry>>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_in_flight: None,
            id_strategy: IdStrategy::Counter,
            schemas: None,
        }
    }
}

impl EndpointConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }
}

/// Lifetime bound for interactive runs.
pub const INTERACTIVE_DEADLINE: Duration = Duration::from_secs(2 * 60);

/// Lifetime bound for background/script runs.
pub const SCRIPT_DEADLINE: Duration = Duration::from_secs(15 * 60);

/// How long to wait for a finish report after the context exits or the
/// channel closes.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(500);

/// How long a spawned child has to dial back after the bootstrap message.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supervised-run behavior knobs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Total lifetime bound. `None` or zero disables it.
    pub deadline: Option<Duration>,
    /// Configuration of the host-side endpoint.
    pub endpoint: EndpointConfig,
    pub exit_grace: Duration,
    pub connect_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            deadline: Some(INTERACTIVE_DEADLINE),
            endpoint: EndpointConfig::default(),
            exit_grace: DEFAULT_EXIT_GRACE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SupervisorConfig {
    /// Preset for long-running script executions.
    pub fn script() -> Self {
        Self {
            deadline: Some(SCRIPT_DEADLINE),
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn effective_deadline(&self) -> Option<Duration> {
        self.deadline.filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_deadline_disables() {
        let config = SupervisorConfig::default().with_deadline(Some(Duration::ZERO));
        assert_eq!(config.effective_deadline(), None);
        assert_eq!(
            SupervisorConfig::script().effective_deadline(),
            Some(SCRIPT_DEADLINE)
        );
        assert_eq!(
            SupervisorConfig::default().effective_deadline(),
            Some(INTERACTIVE_DEADLINE)
        );
    }

    #[test]
    fn endpoint_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.id_strategy, IdStrategy::Counter);
        assert!(config.max_in_flight.is_none());
    }
}
