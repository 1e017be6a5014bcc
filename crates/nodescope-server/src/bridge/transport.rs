//! Seam between the writer task and the companion stream.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A forward write to the companion failed.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// What went wrong.
    pub message: String,
}

impl TransportError {
    /// Build from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Writes framed requests onto the companion stream.
///
/// Production binds this to the bridge response body; tests inject failing
/// implementations to exercise the retry policy.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Write one framed request and flush it to the peer.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;
}

/// Transport backed by the streaming HTTP response body channel.
///
/// Each frame becomes one body chunk, which hyper flushes to the peer; a
/// closed channel means the peer is gone.
pub struct BodyTransport {
    tx: mpsc::Sender<Bytes>,
}

impl BodyTransport {
    /// Wrap the response-body sender.
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RequestTransport for BodyTransport {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::new("companion stream closed"))
    }
}
