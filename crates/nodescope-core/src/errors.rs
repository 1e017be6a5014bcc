//! Error taxonomy surfaced to operators.

use serde::{Deserialize, Serialize};

/// Failure kinds attached to terminal response chunks and API errors.
///
/// Serialises to the kebab-case kind names carried on the wire
/// (e.g. `"not-connected"`, `"send-failed"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed handshake or response object.
    BadRequest,
    /// Unknown session PIN or node id.
    NotFound,
    /// Session is not attached to the requested node.
    NotAttached,
    /// The node has no live companion connection.
    NotConnected,
    /// Write to the companion stream failed after the retry limit.
    SendFailed,
    /// In-flight request drained because the companion went away.
    Disconnected,
    /// PIN space or queue exhausted.
    CapacityExhausted,
    /// Error reported by the companion or subject node itself.
    Remote,
    /// Unexpected invariant violation.
    Internal,
}

impl ErrorKind {
    /// Kebab-case name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::NotFound => "not-found",
            Self::NotAttached => "not-attached",
            Self::NotConnected => "not-connected",
            Self::SendFailed => "send-failed",
            Self::Disconnected => "disconnected",
            Self::CapacityExhausted => "capacity-exhausted",
            Self::Remote => "remote",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type returned by the registry, node sessions, and the facade.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed input from a companion or operator.
    #[error("{message}")]
    BadRequest {
        /// What was malformed.
        message: String,
    },

    /// No live session with this PIN.
    #[error("unknown session pin '{pin}'")]
    SessionNotFound {
        /// The PIN that was looked up.
        pin: String,
    },

    /// No node record with this id.
    #[error("unknown node '{node_id}'")]
    NodeNotFound {
        /// The node id that was looked up.
        node_id: String,
    },

    /// The session exists but is not attached to the node.
    #[error("session '{pin}' is not attached to node '{node_id}'")]
    NotAttached {
        /// Session PIN.
        pin: String,
        /// Requested node id.
        node_id: String,
    },

    /// The node has no live companion connection.
    #[error("node '{node_id}' has no live companion connection")]
    NotConnected {
        /// Requested node id.
        node_id: String,
    },

    /// Forward write failed after exhausting retries.
    #[error("{message}")]
    SendFailed {
        /// Description of the write failure.
        message: String,
    },

    /// The companion connection went away with the request in flight.
    #[error("companion for node '{node_id}' disconnected")]
    Disconnected {
        /// Node the request was issued to.
        node_id: String,
    },

    /// PIN space or a bounded queue is full.
    #[error("{message}")]
    CapacityExhausted {
        /// Which capacity ran out.
        message: String,
    },

    /// Invariant violation.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl BridgeError {
    /// The taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::SessionNotFound { .. } | Self::NodeNotFound { .. } => ErrorKind::NotFound,
            Self::NotAttached { .. } => ErrorKind::NotAttached,
            Self::NotConnected { .. } => ErrorKind::NotConnected,
            Self::SendFailed { .. } => ErrorKind::SendFailed,
            Self::Disconnected { .. } => ErrorKind::Disconnected,
            Self::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
