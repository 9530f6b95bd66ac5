//! Connection pool seam.
//!
//! The hub core never touches sockets. It registers a [SpeakerListener] with whatever
//! [SpeakerPool] owns the agent connections and receives connect/disconnect notifications and
//! decoded-envelope messages through it.
//!
//! [LocalPool] is the in-process implementation: every [Connection] runs as its own tokio task
//! with an ordered inbound queue. Messages on one connection are handled in the order they were
//! sent; there is no ordering across connections.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    collections::{BTreeMap, BTreeSet},
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    codec::StructMessage, config::DEFAULT_QUEUE_DEPTH, error::TopologyError,
    properties::origin_key,
};

pub type ConnectionId = u64;

/// Metadata the transport knows about one agent connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: ConnectionId,
    /// Declared service type of the agent (e.g. "agent", "analyzer")
    pub service_type: String,
    pub remote_host: Option<String>,
}

impl PeerInfo {
    pub fn new<S: Into<String>>(id: ConnectionId, service_type: S, remote_host: Option<&str>) -> Self {
        PeerInfo {
            id,
            service_type: service_type.into(),
            remote_host: remote_host.map(|h| h.to_string()),
        }
    }

    /// The origin key of everything this peer contributes.
    pub fn origin(&self) -> String {
        origin_key(&self.service_type, self.remote_host.as_deref())
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.origin())
    }
}

/// Callbacks a pool delivers to its registered handlers. Every method defaults to a no-op so a
/// handler only implements what it needs.
pub trait SpeakerListener: Send + Sync {
    fn on_connected(&self, _peer: &PeerInfo) {}
    fn on_disconnected(&self, _peer: &PeerInfo) {}
    fn on_struct_message(&self, _peer: &PeerInfo, _msg: &StructMessage) {}
}

pub trait SpeakerPool {
    /// Receive connect and disconnect notifications.
    fn add_event_handler(&self, handler: Arc<dyn SpeakerListener>);
    /// Receive messages published under any of `namespaces`.
    fn add_struct_message_handler(&self, handler: Arc<dyn SpeakerListener>, namespaces: &[&str]);
}

type MessageRoute = (BTreeSet<String>, Arc<dyn SpeakerListener>);

/// Items on a connection's inbound queue.
enum Frame {
    Message(StructMessage),
    /// Acknowledged once every frame queued before it has been dispatched
    Barrier(oneshot::Sender<()>),
}

/// Run one handler callback. A panicking handler is logged and skipped so the connection keeps
/// its queue and still delivers its disconnect.
fn guarded<F: FnOnce()>(peer: &PeerInfo, what: &str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            "[LocalPool] handler panicked on {} from {}: {}",
            what,
            peer,
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

struct PoolInner {
    event_handlers: RwLock<Vec<Arc<dyn SpeakerListener>>>,
    message_handlers: RwLock<Vec<MessageRoute>>,
    connections: Mutex<BTreeMap<ConnectionId, PeerInfo>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl PoolInner {
    fn event_handlers(&self) -> Vec<Arc<dyn SpeakerListener>> {
        self.event_handlers.read().clone()
    }

    fn handlers_for(&self, namespace: &str) -> Vec<Arc<dyn SpeakerListener>> {
        self.message_handlers
            .read()
            .iter()
            .filter(|(namespaces, _)| namespaces.contains(namespace))
            .map(|(_, handler)| handler.clone())
            .collect()
    }

    fn connected(&self, peer: &PeerInfo) {
        self.connections.lock().insert(peer.id, peer.clone());
        tracing::debug!("[LocalPool] {} connected", peer);
        for handler in self.event_handlers() {
            guarded(peer, "connect", || handler.on_connected(peer));
        }
    }

    fn dispatch(&self, peer: &PeerInfo, msg: &StructMessage) {
        let handlers = self.handlers_for(&msg.namespace);
        if handlers.is_empty() {
            tracing::debug!(
                "[LocalPool] no handler for namespace {}, dropping {} from {}",
                msg.namespace,
                msg.msg_type,
                peer
            );
        }
        for handler in handlers {
            guarded(peer, &msg.msg_type, || handler.on_struct_message(peer, msg));
        }
    }

    fn disconnected(&self, peer: &PeerInfo) {
        self.connections.lock().remove(&peer.id);
        tracing::debug!("[LocalPool] {} disconnected", peer);
        for handler in self.event_handlers() {
            guarded(peer, "disconnect", || handler.on_disconnected(peer));
        }
    }
}

/// In-process [SpeakerPool]. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct LocalPool {
    inner: Arc<PoolInner>,
}

impl Default for LocalPool {
    fn default() -> Self {
        LocalPool::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl fmt::Debug for LocalPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPool")
            .field("connections", &self.inner.connections.lock().len())
            .field("queue_depth", &self.inner.queue_depth)
            .finish()
    }
}

impl LocalPool {
    pub fn new(queue_depth: usize) -> Self {
        LocalPool {
            inner: Arc::new(PoolInner {
                event_handlers: RwLock::new(Vec::new()),
                message_handlers: RwLock::new(Vec::new()),
                connections: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    /// Accept a new agent connection. Must be called from within a tokio runtime.
    pub fn connect<S: Into<String>>(&self, service_type: S, remote_host: Option<&str>) -> Connection {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let peer = PeerInfo::new(id, service_type, remote_host);
        let (tx, mut rx) = mpsc::channel::<Frame>(self.inner.queue_depth);

        let inner = self.inner.clone();
        let task_peer = peer.clone();
        let handle = tokio::spawn(async move {
            inner.connected(&task_peer);
            while let Some(frame) = rx.recv().await {
                match frame {
                    Frame::Message(msg) => inner.dispatch(&task_peer, &msg),
                    Frame::Barrier(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            inner.disconnected(&task_peer);
        });

        Connection { peer, tx, handle }
    }

    /// Peers whose connection task is currently running.
    pub fn connected(&self) -> Vec<PeerInfo> {
        self.inner.connections.lock().values().cloned().collect()
    }
}

impl SpeakerPool for LocalPool {
    fn add_event_handler(&self, handler: Arc<dyn SpeakerListener>) {
        self.inner.event_handlers.write().push(handler);
    }

    fn add_struct_message_handler(&self, handler: Arc<dyn SpeakerListener>, namespaces: &[&str]) {
        let namespaces = namespaces.iter().map(|n| n.to_string()).collect();
        self.inner.message_handlers.write().push((namespaces, handler));
    }
}

/// Agent side of a [LocalPool] connection. Dropping it closes the connection without waiting.
pub struct Connection {
    peer: PeerInfo,
    tx: mpsc::Sender<Frame>,
    handle: JoinHandle<()>,
}

impl Connection {
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub async fn send(&self, msg: StructMessage) -> Result<(), TopologyError> {
        self.tx
            .send(Frame::Message(msg))
            .await
            .map_err(|e| self.closed_error(e))
    }

    /// Wait until every message sent so far on this connection has been handled. The connection
    /// stays open.
    pub async fn flush(&self) -> Result<(), TopologyError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Frame::Barrier(ack))
            .await
            .map_err(|e| self.closed_error(e))?;
        done.await.map_err(|_| {
            TopologyError::Channel(format!("connection {} stopped before flushing", self.peer))
        })
    }

    fn closed_error(&self, e: mpsc::error::SendError<Frame>) -> TopologyError {
        let what = match e.0 {
            Frame::Message(msg) => msg.msg_type,
            Frame::Barrier(_) => "flush".to_string(),
        };
        TopologyError::Channel(format!(
            "connection {} is closed, could not deliver {}",
            self.peer, what
        ))
    }

    /// Close the connection and wait until every queued message and the disconnect
    /// notification have been handled.
    pub async fn close(self) -> Result<(), TopologyError> {
        let Connection { peer, tx, handle } = self;
        drop(tx);
        handle
            .await
            .map_err(|e| TopologyError::Channel(format!("connection {peer} task failed: {e}")))
    }
}
