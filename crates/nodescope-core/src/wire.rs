//! Wire-format types for the companion bridge protocol.
//!
//! The companion speaks a stream of whitespace-separated JSON objects over a
//! single duplex HTTP body: one [`Handshake`] first, then [`NodeResponse`]
//! objects inbound, with [`NodeRequest`] objects flowing outbound.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorKind;

/// First object a companion sends on the bridge stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version declared by the companion.
    pub version: u64,
    /// PINs of the operator sessions this companion serves.
    #[serde(default)]
    pub sessions: Vec<String>,
    /// Subject nodes reachable through this connection.
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// Metadata a companion declares for one subject node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Globally unique node identifier, chosen by the companion.
    pub id: String,
    /// Client-declared node name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Subject node software version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Diagnostic request written to the companion (server → client).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRequest {
    /// Correlation id, unique for the lifetime of the stream.
    pub id: String,
    /// Method to invoke on the subject node.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// One response object from the companion (client → server).
///
/// Several responses may carry the same `id`; the sequence for a request ends
/// with `last == true`. An error-bearing response is implicitly terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeResponse {
    /// Correlation id echoing the request.
    pub id: String,
    /// Payload fragment; absent on pure status or error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Value>,
    /// Error reported by the companion or subject node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Whether this is the final message for the request.
    #[serde(default)]
    pub last: bool,
}

impl NodeResponse {
    /// True when this response terminates its request (explicitly or via an
    /// error, which is implicitly terminal).
    pub fn is_terminal(&self) -> bool {
        self.last || self.error.is_some()
    }
}

/// Error descriptor carried inside a [`NodeResponse`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Human-readable message.
    pub message: String,
}

/// Terminal error attached to a [`ResponseChunk`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkError {
    /// Taxonomy kind (kebab-case on the wire).
    pub kind: ErrorKind,
    /// Short message.
    pub message: String,
}

/// A chunk surfaced to the operator for one in-flight request.
///
/// Companion-reported errors pass through with kind [`ErrorKind::Remote`];
/// synthetic terminals minted by the bridge carry the taxonomy kind of the
/// failure (`disconnected`, `send-failed`, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseChunk {
    /// Payload fragment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Terminal error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkError>,
    /// Whether the stream ends after this chunk.
    pub last: bool,
}

impl ResponseChunk {
    /// A data chunk.
    pub fn data(payload: Value, last: bool) -> Self {
        Self {
            payload: Some(payload),
            error: None,
            last,
        }
    }

    /// A synthetic terminal error chunk.
    pub fn terminal_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            payload: None,
            error: Some(ChunkError {
                kind,
                message: message.into(),
            }),
            last: true,
        }
    }
}

impl From<NodeResponse> for ResponseChunk {
    fn from(response: NodeResponse) -> Self {
        let last = response.is_terminal();
        Self {
            payload: response.chunk,
            error: response.error.map(|e| ChunkError {
                kind: ErrorKind::Remote,
                message: e.message,
            }),
            last,
        }
    }
}
