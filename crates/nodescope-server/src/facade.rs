//! Operator-facing API: issue diagnostic requests, list nodes, manage
//! sessions. UI handlers are thin clients of this facade.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use nodescope_core::{BridgeError, NodeRequest, ResponseChunk};

use crate::config::ServerConfig;
use crate::metrics::RPC_ISSUED_TOTAL;
use crate::node::PendingRequest;
use crate::registry::SessionRegistry;

/// What a session sees of one of its nodes.
#[derive(Clone, Debug, Serialize)]
pub struct NodeDescriptor {
    /// Node id.
    pub id: String,
    /// Client-declared name, if the node has ever handshaked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Subject node version, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether a companion is currently connected.
    pub connected: bool,
    /// Last-known remote peer address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

/// Lazy sequence of response chunks for one issued request.
///
/// Ends after the terminal chunk (`last == true`). Dropping the stream
/// cancels the request: later chunks are discarded by the correlator and no
/// cancel message crosses the wire.
#[derive(Debug)]
pub struct ResponseStream {
    request_id: String,
    rx: mpsc::Receiver<ResponseChunk>,
    done: bool,
}

impl ResponseStream {
    fn new(request_id: String, rx: mpsc::Receiver<ResponseChunk>) -> Self {
        Self {
            request_id,
            rx,
            done: false,
        }
    }

    /// The id the bridge correlates responses by.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Next chunk, or `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<ResponseChunk> {
        if self.done {
            return None;
        }
        let chunk = self.rx.recv().await?;
        if chunk.last {
            self.done = true;
        }
        Some(chunk)
    }
}

impl Stream for ResponseStream {
    type Item = ResponseChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.last {
                    self.done = true;
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The inward-facing API the UI uses.
#[derive(Clone)]
pub struct OperatorFacade {
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
}

impl OperatorFacade {
    /// Build a facade over the shared registry.
    pub fn new(registry: Arc<SessionRegistry>, config: ServerConfig) -> Self {
        Self { registry, config }
    }

    /// Create an operator session, returning its PIN.
    pub fn create_session(&self, name: &str) -> Result<String, BridgeError> {
        self.registry.create_session(name)
    }

    /// Destroy an operator session.
    pub fn remove_session(&self, pin: &str) -> Result<(), BridgeError> {
        if self.registry.remove_session(pin) {
            Ok(())
        } else {
            Err(BridgeError::SessionNotFound { pin: pin.to_owned() })
        }
    }

    /// Describe every node attached to a session, including nodes that have
    /// been declared but never handshaked (shown disconnected).
    pub fn list_nodes(&self, pin: &str) -> Result<Vec<NodeDescriptor>, BridgeError> {
        let session = self
            .registry
            .find_session(pin)
            .ok_or_else(|| BridgeError::SessionNotFound { pin: pin.to_owned() })?;

        let mut descriptors: Vec<NodeDescriptor> = session
            .attached
            .iter()
            .map(|node_id| match self.registry.find_node(node_id) {
                Some(node) => {
                    let info = node.info();
                    NodeDescriptor {
                        id: info.id,
                        name: info.name,
                        version: info.version,
                        connected: node.is_connected(),
                        remote_addr: node.remote_addr(),
                    }
                }
                None => NodeDescriptor {
                    id: node_id.clone(),
                    name: None,
                    version: None,
                    connected: false,
                    remote_addr: None,
                },
            })
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(descriptors)
    }

    /// Issue a diagnostic request to a node attached to the session.
    ///
    /// Resolves the session, the attachment, and the node's connection state
    /// before enqueueing; returns the chunk stream for the caller to drain.
    pub fn issue(
        &self,
        pin: &str,
        node_id: &str,
        method: &str,
        params: Value,
    ) -> Result<ResponseStream, BridgeError> {
        let session = self
            .registry
            .find_session(pin)
            .ok_or_else(|| BridgeError::SessionNotFound { pin: pin.to_owned() })?;
        if !session.attached.contains(node_id) {
            return Err(BridgeError::NotAttached {
                pin: pin.to_owned(),
                node_id: node_id.to_owned(),
            });
        }
        let node = self
            .registry
            .find_node(node_id)
            .ok_or_else(|| BridgeError::NodeNotFound {
                node_id: node_id.to_owned(),
            })?;

        let (sink_tx, sink_rx) = mpsc::channel(self.config.response_sink_capacity.max(1));
        let request = NodeRequest {
            id: Uuid::now_v7().to_string(),
            method: method.to_owned(),
            params,
        };
        let request_id = request.id.clone();

        node.enqueue(PendingRequest {
            request,
            sink: sink_tx,
            retries: 0,
        })?;

        counter!(RPC_ISSUED_TOTAL, "method" => method.to_owned()).increment(1);
        debug!(pin, node_id, method, request_id = %request_id, "issued diagnostic request");
        Ok(ResponseStream::new(request_id, sink_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use nodescope_core::{ErrorKind, NodeInfo, NodeResponse};

    fn setup() -> (Arc<SessionRegistry>, OperatorFacade) {
        let registry = Arc::new(SessionRegistry::new(16, 4096));
        let facade = OperatorFacade::new(registry.clone(), ServerConfig::default());
        (registry, facade)
    }

    async fn attached_connected_node(
        registry: &Arc<SessionRegistry>,
        facade: &OperatorFacade,
        node_id: &str,
    ) -> String {
        let pin = facade.create_session("ops").unwrap();
        let node = registry
            .find_or_create_node(&NodeInfo {
                id: node_id.into(),
                name: None,
                version: Some("2.50".into()),
            })
            .unwrap();
        let _ = node.connect("peer:1", CancellationToken::new()).await;
        node.attach_sessions(&[pin.clone()]);
        assert!(registry.attach(&pin, &[node_id.to_owned()]));
        pin
    }

    #[tokio::test]
    async fn issue_enqueues_and_streams_chunks() {
        let (registry, facade) = setup();
        let pin = attached_connected_node(&registry, &facade, "nA").await;

        let mut stream = facade.issue(&pin, "nA", "cmd_line", json!({})).unwrap();
        let node = registry.find_node("nA").unwrap();

        // Simulate the writer + companion: correlate, then respond.
        let queued = node.queue_receiver().lock().await.recv().await.unwrap();
        assert_eq!(queued.request.method, "cmd_line");
        node.correlator()
            .insert(queued.request.id.clone(), queued.sink.clone());
        let _ = node
            .deliver(NodeResponse {
                id: queued.request.id.clone(),
                chunk: Some(json!(["--datadir", "/d"])),
                error: None,
                last: true,
            })
            .await;

        let chunk = stream.next().await.unwrap();
        assert_eq!(chunk.payload.unwrap()[0], "--datadir");
        assert!(chunk.last);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn issue_unknown_session_is_not_found() {
        let (_registry, facade) = setup();
        let err = facade.issue("99999999", "nA", "flags", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn issue_unattached_node_is_not_attached() {
        let (registry, facade) = setup();
        let pin = facade.create_session("ops").unwrap();
        let _ = registry
            .find_or_create_node(&NodeInfo {
                id: "nA".into(),
                ..NodeInfo::default()
            })
            .unwrap();

        let err = facade.issue(&pin, "nA", "flags", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAttached);
    }

    #[tokio::test]
    async fn issue_attached_but_never_seen_node_is_not_found() {
        let (registry, facade) = setup();
        let pin = facade.create_session("ops").unwrap();
        assert!(registry.attach(&pin, &["phantom".into()]));

        let err = facade.issue(&pin, "phantom", "flags", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn issue_disconnected_node_is_not_connected() {
        let (registry, facade) = setup();
        let pin = facade.create_session("ops").unwrap();
        let _ = registry
            .find_or_create_node(&NodeInfo {
                id: "nA".into(),
                ..NodeInfo::default()
            })
            .unwrap();
        assert!(registry.attach(&pin, &["nA".into()]));

        let err = facade.issue(&pin, "nA", "flags", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn request_ids_are_unique() {
        let (registry, facade) = setup();
        let pin = attached_connected_node(&registry, &facade, "nA").await;

        let a = facade.issue(&pin, "nA", "flags", json!({})).unwrap();
        let b = facade.issue(&pin, "nA", "flags", json!({})).unwrap();
        assert_ne!(a.request_id(), b.request_id());
    }

    #[tokio::test]
    async fn list_nodes_includes_never_seen_attachments() {
        let (registry, facade) = setup();
        let pin = attached_connected_node(&registry, &facade, "nA").await;
        assert!(registry.attach(&pin, &["nA".into(), "nZ".into()]));

        let nodes = facade.list_nodes(&pin).unwrap();
        assert_eq!(nodes.len(), 2);
        let n_a = nodes.iter().find(|n| n.id == "nA").unwrap();
        assert!(n_a.connected);
        assert_eq!(n_a.version.as_deref(), Some("2.50"));
        assert_eq!(n_a.remote_addr.as_deref(), Some("peer:1"));
        let n_z = nodes.iter().find(|n| n.id == "nZ").unwrap();
        assert!(!n_z.connected);
        assert!(n_z.version.is_none());
    }

    #[tokio::test]
    async fn list_nodes_unknown_session() {
        let (_registry, facade) = setup();
        let err = facade.list_nodes("00000000").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_session_then_issue_fails() {
        let (registry, facade) = setup();
        let pin = attached_connected_node(&registry, &facade, "nA").await;

        facade.remove_session(&pin).unwrap();
        let err = facade.issue(&pin, "nA", "flags", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            facade.remove_session(&pin).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn response_stream_implements_stream() {
        let (registry, facade) = setup();
        let pin = attached_connected_node(&registry, &facade, "nA").await;

        let stream = facade.issue(&pin, "nA", "logs", json!({})).unwrap();
        let node = registry.find_node("nA").unwrap();
        let queued = node.queue_receiver().lock().await.recv().await.unwrap();
        node.correlator()
            .insert(queued.request.id.clone(), queued.sink.clone());
        for i in 0..3 {
            let _ = node
                .deliver(NodeResponse {
                    id: queued.request.id.clone(),
                    chunk: Some(json!(i)),
                    error: None,
                    last: i == 2,
                })
                .await;
        }

        let chunks: Vec<ResponseChunk> = stream.collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].payload.as_ref().unwrap(), &json!(1));
        assert!(chunks[2].last);
    }

    #[tokio::test]
    async fn dropping_stream_cancels_the_request() {
        let (registry, facade) = setup();
        let pin = attached_connected_node(&registry, &facade, "nA").await;

        let stream = facade.issue(&pin, "nA", "logs", json!({})).unwrap();
        let node = registry.find_node("nA").unwrap();
        let queued = node.queue_receiver().lock().await.recv().await.unwrap();
        let id = queued.request.id.clone();
        node.correlator().insert(id.clone(), queued.sink.clone());

        drop(stream);

        // The next delivery notices the cancelled sink and removes the entry.
        let _ = node
            .deliver(NodeResponse {
                id: id.clone(),
                chunk: Some(json!(1)),
                error: None,
                last: false,
            })
            .await;
        assert!(node.correlator().is_empty());
    }
}
