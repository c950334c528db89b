//! The request/reply facade over one channel adapter.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use replyport_frame::Message;
use replyport_transport::{
    ChannelAdapter, CloseReason, Inbound, InboundReceiver, InboundSender, TransportError,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::config::EndpointConfig;
use crate::error::{Result, RpcError};
use crate::handler::{CallContext, HandlerResult, HandlerTable};
use crate::panic::panic_message;
use crate::registry::{CallRegistry, PendingInfo};
use crate::sync::lock;

/// Assembles an [`Endpoint`] before its adapter starts delivering.
#[derive(Debug, Default)]
pub struct EndpointBuilder {
    config: EndpointConfig,
    handlers: Option<HandlerTable>,
    origin: Option<String>,
}

impl EndpointBuilder {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            handlers: None,
            origin: None,
        }
    }

    /// Use a shared handler table instead of a private one. A shared table
    /// is left intact when the endpoint closes.
    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Tag inbound calls with an origin, exposed as [`CallContext::origin`].
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Build without starting. Inbound messages stay queued in the adapter
    /// until [`Endpoint::start`] (or the first `invoke`).
    pub fn build<A: ChannelAdapter>(self, adapter: A) -> Endpoint {
        self.build_shared(Arc::new(adapter))
    }

    pub fn build_shared(self, adapter: Arc<dyn ChannelAdapter>) -> Endpoint {
        let owns_handlers = self.handlers.is_none();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        Endpoint {
            inner: Arc::new(Inner {
                registry: CallRegistry::new(self.config.id_strategy, self.config.max_in_flight),
                handlers: self.handlers.unwrap_or_default(),
                owns_handlers,
                adapter,
                config: self.config,
                origin: self.origin,
                inbound: Mutex::new(Some((inbound_tx, inbound_rx))),
                torn_down: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                closed_tx,
            }),
        }
    }

    /// Build and start. Must be called within a Tokio runtime.
    pub fn start<A: ChannelAdapter>(self, adapter: A) -> Result<Endpoint> {
        let endpoint = self.build(adapter);
        endpoint.start()?;
        Ok(endpoint)
    }
}

/// One side of a request/reply conversation over a [`ChannelAdapter`].
///
/// Cloning is cheap and every clone drives the same channel. The channel is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn ChannelAdapter>,
    registry: CallRegistry,
    handlers: HandlerTable,
    owns_handlers: bool,
    config: EndpointConfig,
    origin: Option<String>,
    inbound: Mutex<Option<(InboundSender, InboundReceiver)>>,
    torn_down: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    closed_tx: watch::Sender<bool>,
}

impl Endpoint {
    /// Start an endpoint with a private handler table.
    pub fn new<A: ChannelAdapter>(adapter: A, config: EndpointConfig) -> Result<Self> {
        EndpointBuilder::new(config).start(adapter)
    }

    pub fn builder(config: EndpointConfig) -> EndpointBuilder {
        EndpointBuilder::new(config)
    }

    /// Begin inbound dispatch. Idempotent; fails once the endpoint is closed.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::ChannelClosed);
        }
        let Some((inbound_tx, inbound_rx)) = lock(&self.inner.inbound).take() else {
            return Ok(());
        };
        tokio::spawn(dispatch_loop(Arc::downgrade(&self.inner), inbound_rx));
        if let Err(err) = self.inner.adapter.start(inbound_tx) {
            self.inner.teardown(CloseReason::Fault(err.to_string()));
            return Err(err.into());
        }
        debug!(transport = self.inner.adapter.transport_name(), "endpoint started");
        Ok(())
    }

    /// Call `name` on the other side and await its result, bounded by the
    /// configured call timeout.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke_with_timeout(name, args, self.inner.config.call_timeout)
            .await
    }

    /// Call `name` with an explicit timeout.
    ///
    /// Dropping the returned future withdraws the call; a response that
    /// arrives afterwards is ignored.
    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.start()?;
        let inner = &self.inner;
        let (correlation_id, mut settled) = inner.registry.register(name)?;
        let _guard = CallGuard {
            registry: &inner.registry,
            correlation_id: &correlation_id,
        };

        trace!(name, %correlation_id, "invoking");
        inner
            .adapter
            .send(Message::call(name, args, correlation_id.clone()))?;

        tokio::select! {
            outcome = &mut settled => outcome.unwrap_or(Err(RpcError::ChannelClosed)),
            _ = tokio::time::sleep(timeout) => {
                if inner.registry.remove(&correlation_id) {
                    debug!(name, %correlation_id, ?timeout, "call timed out");
                    Err(RpcError::Timeout(timeout))
                } else {
                    // Settled between the timer firing and the removal.
                    settled.await.unwrap_or(Err(RpcError::ChannelClosed))
                }
            }
        }
    }

    /// Fire-and-forget event. Creates no registry entry.
    pub fn send(&self, name: &str, args: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::ChannelClosed);
        }
        trace!(name, "sending event");
        self.inner.adapter.send(Message::event(name, args))?;
        Ok(())
    }

    /// Register a handler for calls and events named `name`, replacing any
    /// previous one.
    pub fn on<F, Fut>(&self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.handlers.on(name, handler)
    }

    pub fn off(&self, name: &str) -> bool {
        self.inner.handlers.off(name)
    }

    /// Registered handler names, sorted.
    pub fn handlers(&self) -> Vec<String> {
        self.inner.handlers.names()
    }

    pub fn handler_table(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    /// Outstanding calls, oldest first.
    pub fn pending(&self) -> Vec<PendingInfo> {
        self.inner.registry.pending()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Close the channel and reject every outstanding call.
    pub fn close(&self) {
        self.inner.teardown(CloseReason::Local);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.inner.close_reason).clone()
    }

    /// Resolves once the endpoint has been torn down, for any reason.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn origin(&self) -> Option<&str> {
        self.inner.origin.as_deref()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.adapter.transport_name()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("transport", &self.transport_name())
            .field("origin", &self.inner.origin)
            .field("registry", &self.inner.registry)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Withdraws the registry entry when an `invoke` future ends for any
/// reason. A no-op once the entry has been settled.
struct CallGuard<'a> {
    registry: &'a CallRegistry,
    correlation_id: &'a str,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.registry.remove(self.correlation_id) {
            trace!(correlation_id = self.correlation_id, "call withdrawn");
        }
    }
}

impl Inner {
    fn dispatch(&self, message: Message) {
        match message {
            Message::Response {
                correlation_id,
                outcome,
                ..
            } => {
                self.registry.settle(&correlation_id, outcome);
            }
            Message::Call {
                name,
                args,
                correlation_id,
            } => self.handle(name, args, Some(correlation_id)),
            Message::Event { name, args } => self.handle(name, args, None),
        }
    }

    fn handle(&self, name: String, args: Vec<Value>, correlation_id: Option<String>) {
        let Some(handler) = self.handlers.get(&name) else {
            match correlation_id {
                Some(id) => {
                    debug!(%name, "no handler for call");
                    let message = format!("\"{name}\" doesn't have handler");
                    self.reply(&name, id, Err(message));
                }
                None => trace!(%name, "dropping event without handler"),
            }
            return;
        };

        if let Some(schemas) = &self.config.schemas {
            if let Err(err) = schemas.validate_args(&name, &args) {
                debug!(%name, error = %err, "rejecting arguments");
                if let Some(id) = correlation_id {
                    self.reply(&name, id, Err(err.to_string()));
                }
                return;
            }
        }

        let ctx = CallContext {
            name: name.clone(),
            correlation_id: correlation_id.clone(),
            origin: self.origin.clone(),
        };
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, args))) {
            Ok(future) => future,
            Err(payload) => {
                let message = format!("handler \"{name}\" panicked: {}", panic_message(&*payload));
                debug!(%name, "{message}");
                if let Some(id) = correlation_id {
                    self.reply(&name, id, Err(message));
                }
                return;
            }
        };

        let adapter = Arc::clone(&self.adapter);
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(format!(
                    "handler \"{name}\" panicked: {}",
                    panic_message(&*payload)
                )),
            };
            match correlation_id {
                Some(id) => send_response(adapter.as_ref(), &name, id, outcome),
                None => {
                    if let Err(message) = outcome {
                        debug!(%name, error = %message, "event handler failed");
                    }
                }
            }
        });
    }

    fn reply(&self, name: &str, correlation_id: String, outcome: HandlerResult) {
        send_response(self.adapter.as_ref(), name, correlation_id, outcome);
    }

    fn teardown(&self, reason: CloseReason) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.adapter.close();
        let rejected = self.registry.close();
        if self.owns_handlers {
            self.handlers.clear();
        }
        lock(&self.inbound).take();
        debug!(
            transport = self.adapter.transport_name(),
            ?reason,
            rejected,
            "endpoint closed"
        );
        *lock(&self.close_reason) = Some(reason);
        self.closed_tx.send_replace(true);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.teardown(CloseReason::Local);
    }
}

async fn dispatch_loop(endpoint: Weak<Inner>, mut inbound: InboundReceiver) {
    let reason = loop {
        let Some(item) = inbound.recv().await else {
            break CloseReason::Remote;
        };
        let Some(inner) = endpoint.upgrade() else {
            return;
        };
        match item {
            Inbound::Message(message) => inner.dispatch(message),
            Inbound::Closed(reason) => break reason,
        }
    };
    if let Some(inner) = endpoint.upgrade() {
        inner.teardown(reason);
    }
}

/// Send a response. If the transport refuses it (too large, say) while still
/// open, the caller gets an error response instead of waiting out its timer.
fn send_response(
    adapter: &dyn ChannelAdapter,
    name: &str,
    correlation_id: String,
    outcome: HandlerResult,
) {
    let err = match adapter.send(Message::response(name, correlation_id.as_str(), outcome)) {
        Ok(()) => return,
        Err(TransportError::Closed) => {
            debug!(name, "response not sent, channel closed");
            return;
        }
        Err(err) => err,
    };
    debug!(name, error = %err, "response refused by transport");
    let fallback = Message::response(
        name,
        correlation_id,
        Err(format!("response not sent: {err}")),
    );
    if let Err(err) = adapter.send(fallback) {
        debug!(name, error = %err, "error response not sent");
    }
}
