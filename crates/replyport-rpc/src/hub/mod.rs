//! Many remote peers behind one WebSocket listener.
//!
//! Every accepted connection that passes the identity handshake becomes its
//! own [`Endpoint`], registered under the peer id it presented. All peer
//! endpoints share the hub's handler table, so a handler registered with
//! [`Hub::on`] serves current and future peers alike.

mod agent;
mod handshake;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::SinkExt;
use replyport_schema::{SchemaError, SchemaRegistry, PEER_IDENTITY};
use replyport_transport::{TransportError, WsAdapter};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, IdStrategy, DEFAULT_CALL_TIMEOUT};
use crate::endpoint::{Endpoint, EndpointBuilder};
use crate::error::{Result, RpcError};
use crate::handler::{HandlerResult, HandlerTable};
use crate::sync::lock;

pub use agent::Agent;
pub use handshake::{HandshakeMessage, PeerIdentity, UNAUTHORIZED};

use handshake::{next_text, validate_identity};

/// Default bound on server-initiated calls to a peer.
pub const DEFAULT_ACK_TIMEOUT: Duration = DEFAULT_CALL_TIMEOUT;

/// Default time a new connection has to send its hello.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Timeout for [`Hub::invoke_on_peer`].
    pub ack_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Configuration of every peer endpoint.
    pub endpoint: EndpointConfig,
    /// Registry holding the `peer-identity` schema. Built-ins when `None`.
    pub schemas: Option<Arc<SchemaRegistry>>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            endpoint: EndpointConfig::default().with_id_strategy(IdStrategy::Random),
            schemas: None,
        }
    }
}

impl HubConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEventKind {
    Connected,
    Disconnected,
}

impl PeerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "peer:connected",
            Self::Disconnected => "peer:disconnected",
        }
    }
}

impl fmt::Display for PeerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub kind: PeerEventKind,
    pub peer: PeerIdentity,
}

/// Handle returned by [`Hub::listen`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

/// WebSocket hub addressing connected peers by id.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

struct Inner {
    config: HubConfig,
    schemas: Arc<SchemaRegistry>,
    handlers: HandlerTable,
    peers: Mutex<HashMap<String, PeerSlot>>,
    listeners: Mutex<Vec<(ListenerId, PeerEventKind, Listener)>>,
    next_listener: AtomicU64,
    next_generation: AtomicU64,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

struct PeerSlot {
    generation: u64,
    identity: PeerIdentity,
    endpoint: Endpoint,
}

impl Hub {
    /// Bind a TCP listener and start accepting peers. Must be called within
    /// a Tokio runtime.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: HubConfig) -> Result<Self> {
        let schemas = match &config.schemas {
            Some(schemas) => Arc::clone(schemas),
            None => Arc::new(SchemaRegistry::with_builtins()?),
        };
        if !schemas.has_schema(PEER_IDENTITY) {
            return Err(SchemaError::NoSchema(PEER_IDENTITY.to_string()).into());
        }

        let listener = TcpListener::bind(addr).await.map_err(TransportError::from)?;
        let local_addr = listener.local_addr().map_err(TransportError::from)?;
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            config,
            schemas,
            handlers: HandlerTable::new(),
            peers: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            next_generation: AtomicU64::new(0),
            local_addr,
            shutdown: shutdown.clone(),
        });

        info!(addr = %local_addr, "hub listening");
        tokio::spawn(accept_loop(listener, Arc::downgrade(&inner), shutdown));
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Register a handler for calls from any peer. The handler receives the
    /// calling peer's id.
    pub fn on<F, Fut>(&self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(String, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.handlers.on(name, move |ctx, args| {
            handler(ctx.origin.unwrap_or_default(), args)
        })
    }

    pub fn off(&self, name: &str) -> bool {
        self.inner.handlers.off(name)
    }

    /// The table shared by every peer endpoint.
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    /// Call `name` on one peer, bounded by the ack timeout. Fails at once
    /// if the peer is not connected.
    pub async fn invoke_on_peer(&self, peer_id: &str, name: &str, args: Vec<Value>) -> Result<Value> {
        let endpoint = self.endpoint_for(peer_id)?;
        endpoint
            .invoke_with_timeout(name, args, self.inner.config.ack_timeout)
            .await
    }

    /// Fire-and-forget event to one peer.
    pub fn send_to_peer(&self, peer_id: &str, name: &str, args: Vec<Value>) -> Result<()> {
        self.endpoint_for(peer_id)?.send(name, args)
    }

    /// Event to every connected peer. Returns how many accepted it.
    pub fn broadcast(&self, name: &str, args: Vec<Value>) -> usize {
        let endpoints: Vec<Endpoint> = lock(&self.inner.peers)
            .values()
            .map(|slot| slot.endpoint.clone())
            .collect();
        endpoints
            .iter()
            .filter(|endpoint| endpoint.send(name, args.clone()).is_ok())
            .count()
    }

    /// Connected peers, sorted by id.
    pub fn peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = lock(&self.inner.peers)
            .values()
            .map(|slot| slot.identity.clone())
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub fn peer(&self, peer_id: &str) -> Option<PeerIdentity> {
        lock(&self.inner.peers)
            .get(peer_id)
            .map(|slot| slot.identity.clone())
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        lock(&self.inner.peers).contains_key(peer_id)
    }

    /// Endpoint of a connected peer.
    pub fn peer_endpoint(&self, peer_id: &str) -> Option<Endpoint> {
        self.endpoint_for(peer_id).ok()
    }

    /// Subscribe to `peer:connected` or `peer:disconnected`.
    pub fn listen<F>(&self, kind: PeerEventKind, listener: F) -> ListenerId
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, kind, Arc::new(listener)));
        id
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    /// Stop accepting and disconnect every peer.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let slots: Vec<PeerSlot> = lock(&self.inner.peers).drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            slot.endpoint.close();
            self.inner.emit(&PeerEvent {
                kind: PeerEventKind::Disconnected,
                peer: slot.identity,
            });
        }
        info!(addr = %self.inner.local_addr, "hub shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn endpoint_for(&self, peer_id: &str) -> Result<Endpoint> {
        lock(&self.inner.peers)
            .get(peer_id)
            .map(|slot| slot.endpoint.clone())
            .ok_or_else(|| RpcError::PeerNotConnected(peer_id.to_string()))
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peers: Vec<String> = self.peers().into_iter().map(|peer| peer.id).collect();
        f.debug_struct("Hub")
            .field("local_addr", &self.inner.local_addr)
            .field("peers", &peers)
            .field("handlers", &self.inner.handlers)
            .finish()
    }
}

impl Inner {
    async fn serve_connection(self: Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        match self.handshake(stream).await {
            Ok(peer_id) => debug!(%remote, peer = %peer_id, "handshake complete"),
            Err(err) => debug!(%remote, error = %err, "connection refused"),
        }
    }

    async fn handshake(self: &Arc<Self>, stream: TcpStream) -> Result<String> {
        let limit = self.config.handshake_timeout;
        let mut ws = tokio::time::timeout(limit, tokio_tungstenite::accept_async(stream))
            .await
            .map_err(|_| RpcError::Handshake("timed out waiting for upgrade".to_string()))??;
        let hello = tokio::time::timeout(limit, next_text(&mut ws))
            .await
            .map_err(|_| RpcError::Handshake("timed out waiting for hello".to_string()))??;

        let identity = match HandshakeMessage::from_text(&hello) {
            Some(HandshakeMessage::Hello { identity }) => validate_identity(&self.schemas, &identity),
            _ => Err(RpcError::Handshake("expected a hello frame".to_string())),
        };
        let identity = match identity {
            Ok(identity) => identity,
            Err(err) => {
                let message = match &err {
                    RpcError::Unauthorized => UNAUTHORIZED.to_string(),
                    other => other.to_string(),
                };
                let reply = HandshakeMessage::Rejected { message }.to_text()?;
                let _ = ws.send(WsMessage::Text(reply)).await;
                let _ = ws.close(None).await;
                return Err(err);
            }
        };

        let adapter = WsAdapter::new(ws);
        let welcome = HandshakeMessage::Welcome {
            peer_id: identity.id.clone(),
        };
        adapter.send_text(welcome.to_text()?)?;
        let peer_id = identity.id.clone();
        self.register_peer(identity, adapter)?;
        Ok(peer_id)
    }

    fn register_peer<S>(self: &Arc<Self>, identity: PeerIdentity, adapter: WsAdapter<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer_id = identity.id.clone();
        let endpoint = EndpointBuilder::new(self.config.endpoint.clone())
            .with_handlers(self.handlers.clone())
            .with_origin(peer_id.clone())
            .start(adapter)?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let replaced = lock(&self.peers).insert(
            peer_id.clone(),
            PeerSlot {
                generation,
                identity: identity.clone(),
                endpoint: endpoint.clone(),
            },
        );
        if let Some(old) = replaced {
            info!(peer = %peer_id, "peer reconnected, replacing previous connection");
            old.endpoint.close();
        }

        info!(peer = %peer_id, name = %identity.name, version = %identity.version, "peer connected");
        self.emit(&PeerEvent {
            kind: PeerEventKind::Connected,
            peer: identity,
        });
        tokio::spawn(watch_disconnect(
            Arc::downgrade(self),
            peer_id,
            generation,
            endpoint,
        ));
        Ok(())
    }

    fn emit(&self, event: &PeerEvent) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let peers = self
            .peers
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, slot) in peers.drain() {
            slot.endpoint.close();
        }
    }
}

async fn accept_loop(listener: TcpListener, hub: Weak<Inner>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, remote) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "hub accept failed");
                continue;
            }
        };
        let Some(inner) = hub.upgrade() else {
            break;
        };
        debug!(%remote, "connection accepted");
        tokio::spawn(inner.serve_connection(stream, remote));
    }
    debug!("hub accept loop stopped");
}

/// Drop the peer's slot once its endpoint closes, unless a reconnect has
/// already replaced it.
async fn watch_disconnect(hub: Weak<Inner>, peer_id: String, generation: u64, endpoint: Endpoint) {
    endpoint.closed().await;
    let Some(hub) = hub.upgrade() else {
        return;
    };
    let removed = {
        let mut peers = lock(&hub.peers);
        match peers.get(&peer_id) {
            Some(slot) if slot.generation == generation => peers.remove(&peer_id),
            _ => None,
        }
    };
    if let Some(slot) = removed {
        info!(peer = %peer_id, reason = ?endpoint.close_reason(), "peer disconnected");
        hub.emit(&PeerEvent {
            kind: PeerEventKind::Disconnected,
            peer: slot.identity,
        });
    }
}
