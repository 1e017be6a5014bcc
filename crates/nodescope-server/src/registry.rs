//! Process-wide directory of operator sessions and node records.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info};

use nodescope_core::{BridgeError, NodeInfo};

use crate::node::NodeSession;

/// Lowest valid PIN (inclusive).
pub const PIN_MIN: u32 = 10_000_000;
/// Highest valid PIN (inclusive).
pub const PIN_MAX: u32 = 99_999_999;

/// An operator session: a PIN-identified bag of attached nodes.
#[derive(Clone, Debug)]
pub struct Session {
    /// 8-decimal-digit identifier, unique among live sessions.
    pub pin: String,
    /// Human-provided name.
    pub name: String,
    /// Node ids this session may drive.
    pub attached: HashSet<String>,
}

/// Directory of sessions (by PIN) and node records (by node id).
///
/// The only place PINs are minted, which is what guarantees their uniqueness.
/// Both locks are short-lived and never held across I/O; pass the registry as
/// an explicit dependency to handler constructors.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    nodes: RwLock<HashMap<String, Arc<NodeSession>>>,
    queue_capacity: usize,
    max_live_sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(queue_capacity: usize, max_live_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            queue_capacity,
            max_live_sessions,
        }
    }

    /// Create a session with a fresh uniformly-random PIN.
    ///
    /// Redraws on collision with a live session; fails with
    /// `capacity-exhausted` once the live-session count reaches the
    /// configured ceiling (long before the PIN space itself is dense).
    pub fn create_session(&self, name: &str) -> Result<String, BridgeError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_live_sessions {
            return Err(BridgeError::CapacityExhausted {
                message: format!("live session limit of {} reached", self.max_live_sessions),
            });
        }

        let mut rng = rand::rng();
        let pin = loop {
            let candidate = rng.random_range(PIN_MIN..=PIN_MAX).to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let _ = sessions.insert(
            pin.clone(),
            Session {
                pin: pin.clone(),
                name: name.to_owned(),
                attached: HashSet::new(),
            },
        );
        info!(pin = %pin, name, "session created");
        Ok(pin)
    }

    /// Look up a live session by PIN.
    pub fn find_session(&self, pin: &str) -> Option<Session> {
        self.sessions.read().get(pin).cloned()
    }

    /// Destroy a session. Returns whether it existed.
    pub fn remove_session(&self, pin: &str) -> bool {
        let removed = self.sessions.write().remove(pin).is_some();
        if removed {
            info!(pin, "session removed");
        }
        removed
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Find a node record, or create one from companion-declared metadata.
    ///
    /// On repeat sight the stored metadata is refreshed. Fails with
    /// `bad-request` when the id is empty.
    pub fn find_or_create_node(&self, info: &NodeInfo) -> Result<Arc<NodeSession>, BridgeError> {
        if info.id.is_empty() {
            return Err(BridgeError::BadRequest {
                message: "node info with empty id".into(),
            });
        }

        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.get(&info.id) {
            existing.update_info(info);
            return Ok(existing.clone());
        }

        let node = Arc::new(NodeSession::new(info.clone(), self.queue_capacity));
        let _ = nodes.insert(info.id.clone(), node.clone());
        info!(node_id = %info.id, version = ?info.version, "node record created");
        Ok(node)
    }

    /// Look up a node record by id.
    pub fn find_node(&self, node_id: &str) -> Option<Arc<NodeSession>> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Number of node records ever seen this process lifetime.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Number of nodes with a live companion connection.
    pub fn connected_node_count(&self) -> usize {
        self.nodes.read().values().filter(|n| n.is_connected()).count()
    }

    /// Replace a session's attached node set.
    ///
    /// Unknown node-ids are recorded anyway, to take effect when the node
    /// appears. Returns `false` when the PIN names no live session.
    pub fn attach(&self, pin: &str, node_ids: &[String]) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(pin) else {
            debug!(pin, "attach to unknown session ignored");
            return false;
        };
        session.attached = node_ids.iter().cloned().collect();
        true
    }
}
