//! Per-subject-node server-side state: request queue, correlator, connection.

use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nodescope_core::{BridgeError, ErrorKind, NodeInfo, NodeRequest, NodeResponse, ResponseChunk};

use crate::correlator::{Correlator, Delivery};

/// Companion connection state for one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live companion.
    Disconnected,
    /// A companion connection is serving this node.
    Connected,
}

#[derive(Debug)]
struct ConnectionInner {
    state: ConnectionState,
    /// Last-known remote peer address, kept across disconnects.
    remote_addr: Option<String>,
    /// Bumped on every connect; stale generations cannot disconnect.
    generation: u64,
    /// Cancellation token of the live connection.
    token: Option<CancellationToken>,
}

/// A request accepted by the facade and queued for the writer task.
pub struct PendingRequest {
    /// The wire object to write.
    pub request: NodeRequest,
    /// Where the caller awaits response chunks.
    pub sink: mpsc::Sender<ResponseChunk>,
    /// Write attempts that have failed so far.
    pub retries: u32,
}

impl PendingRequest {
    /// Terminate the waiting caller with a synthetic error chunk.
    pub async fn fail(self, kind: ErrorKind, message: impl Into<String>) {
        let _ = self
            .sink
            .send(ResponseChunk::terminal_error(kind, message))
            .await;
    }
}

/// Server-side in-memory state for one subject node.
///
/// Owns the bounded FIFO request queue and the correlator. The queue receiver
/// sits behind an async mutex so that exactly one writer task drains it at a
/// time; a superseding connection acquires it only after the prior writer has
/// been cancelled and released it.
#[derive(Debug)]
pub struct NodeSession {
    id: String,
    info: Mutex<NodeInfo>,
    attached_sessions: Mutex<HashSet<String>>,
    conn: Mutex<ConnectionInner>,
    queue_tx: mpsc::Sender<PendingRequest>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<PendingRequest>>,
    correlator: Correlator,
}

impl NodeSession {
    /// Create a disconnected node session from companion-declared metadata.
    pub fn new(info: NodeInfo, queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            id: info.id.clone(),
            info: Mutex::new(info),
            attached_sessions: Mutex::new(HashSet::new()),
            conn: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                remote_addr: None,
                generation: 0,
                token: None,
            }),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            correlator: Correlator::new(),
        }
    }

    /// Node id, as declared by the companion.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last-known metadata.
    pub fn info(&self) -> NodeInfo {
        self.info.lock().clone()
    }

    /// Refresh metadata from a repeat handshake.
    pub fn update_info(&self, info: &NodeInfo) {
        *self.info.lock() = info.clone();
    }

    /// Union session PINs onto the attachment set. Idempotent.
    pub fn attach_sessions(&self, pins: &[String]) {
        let mut attached = self.attached_sessions.lock();
        for pin in pins {
            let _ = attached.insert(pin.clone());
        }
    }

    /// PINs of sessions allowed to drive this node.
    pub fn attached_sessions(&self) -> HashSet<String> {
        self.attached_sessions.lock().clone()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.conn.lock().state
    }

    /// Whether a companion is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Last-known remote peer address.
    pub fn remote_addr(&self) -> Option<String> {
        self.conn.lock().remote_addr.clone()
    }

    /// Number of in-flight requests.
    pub fn in_flight(&self) -> usize {
        self.correlator.len()
    }

    /// The correlator for this node's in-flight requests.
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// The queue receiver, locked by the active writer task.
    pub fn queue_receiver(&self) -> &tokio::sync::Mutex<mpsc::Receiver<PendingRequest>> {
        &self.queue_rx
    }

    /// Mark connected, superseding any prior connection.
    ///
    /// The prior connection's token is cancelled and its in-flight requests
    /// drain as `disconnected`; its later `disconnect` call becomes a stale
    /// no-op. Returns the generation the caller must present on disconnect.
    pub async fn connect(&self, remote_addr: &str, token: CancellationToken) -> u64 {
        let (prior, generation) = {
            let mut conn = self.conn.lock();
            let prior = conn.token.take();
            conn.generation += 1;
            conn.state = ConnectionState::Connected;
            conn.remote_addr = Some(remote_addr.to_owned());
            conn.token = Some(token);
            (prior, conn.generation)
        };

        if let Some(prior) = prior {
            prior.cancel();
            let drained = self
                .correlator
                .drain(ErrorKind::Disconnected, "companion connection superseded")
                .await;
            info!(
                node_id = %self.id,
                drained,
                "superseded previous companion connection"
            );
        }
        generation
    }

    /// Mark disconnected and drain in-flight requests as `disconnected`.
    ///
    /// No-op when `generation` is stale, i.e. a newer connection has already
    /// superseded the caller.
    pub async fn disconnect(&self, generation: u64) {
        {
            let mut conn = self.conn.lock();
            if conn.generation != generation {
                debug!(node_id = %self.id, generation, "stale disconnect ignored");
                return;
            }
            conn.state = ConnectionState::Disconnected;
            conn.token = None;
        }
        let drained = self
            .correlator
            .drain(ErrorKind::Disconnected, "companion disconnected")
            .await;
        if drained > 0 {
            info!(node_id = %self.id, drained, "drained in-flight requests on disconnect");
        }
    }

    /// Queue a request for the writer task. Returns immediately.
    pub fn enqueue(&self, pending: PendingRequest) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected {
                node_id: self.id.clone(),
            });
        }
        self.queue_tx.try_send(pending).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => BridgeError::CapacityExhausted {
                message: format!("request queue for node '{}' is full", self.id),
            },
            mpsc::error::TrySendError::Closed(_) => BridgeError::Internal {
                message: format!("request queue for node '{}' is closed", self.id),
            },
        })
    }

    /// Put a request back on the tail of the queue after a failed write.
    ///
    /// Returns the request when the queue is full so the caller can fail it;
    /// silently dropping it would leak the waiter.
    pub fn requeue(&self, pending: PendingRequest) -> Result<(), PendingRequest> {
        self.queue_tx.try_send(pending).map_err(|err| err.into_inner())
    }

    /// Route a companion response to its waiter.
    pub async fn deliver(&self, response: NodeResponse) -> Delivery {
        self.correlator.deliver(response).await
    }
}
