//! Request correlation: in-flight request ids mapped to their response sinks.

use std::collections::HashMap;

use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use nodescope_core::{ErrorKind, NodeResponse, ResponseChunk};

use crate::metrics::BRIDGE_IN_FLIGHT_REQUESTS;

/// Result of routing one companion response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The id matched an in-flight request.
    Delivered,
    /// The id matched nothing (cancelled, already terminated, or drift).
    Unknown,
}

/// Map from request id to the waiting caller's sink.
///
/// Entered by two producers: the writer task (insert before write, remove on
/// write failure) and the reader task (remove on terminal chunk). A single
/// mutex over the map is sufficient; the sinks carry their own
/// synchronisation. The lock is never held across an await.
#[derive(Default, Debug)]
pub struct Correlator {
    entries: Mutex<HashMap<String, mpsc::Sender<ResponseChunk>>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an in-flight request.
    pub fn insert(&self, id: String, sink: mpsc::Sender<ResponseChunk>) {
        let mut entries = self.entries.lock();
        let _ = entries.insert(id, sink);
        gauge!(BRIDGE_IN_FLIGHT_REQUESTS).set(entries.len() as f64);
    }

    /// Remove an entry, returning its sink if it was present.
    pub fn remove(&self, id: &str) -> Option<mpsc::Sender<ResponseChunk>> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(id);
        if removed.is_some() {
            gauge!(BRIDGE_IN_FLIGHT_REQUESTS).set(entries.len() as f64);
        }
        removed
    }

    /// Whether an id is currently in flight.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Route one companion response to its waiter.
    ///
    /// Error-bearing responses are promoted to terminal; terminal chunks
    /// remove the entry. A sink whose receiver is gone (caller cancelled)
    /// removes the entry silently, and later chunks for that id report
    /// [`Delivery::Unknown`].
    pub async fn deliver(&self, response: NodeResponse) -> Delivery {
        let id = response.id.clone();
        let Some(sink) = self.entries.lock().get(&id).cloned() else {
            return Delivery::Unknown;
        };

        let terminal = response.is_terminal();
        if sink.send(ResponseChunk::from(response)).await.is_err() {
            debug!(request_id = %id, "caller cancelled, dropping correlator entry");
            let _ = self.remove(&id);
            return Delivery::Delivered;
        }
        if terminal {
            let _ = self.remove(&id);
        }
        Delivery::Delivered
    }

    /// Terminate every in-flight request with a synthetic error chunk and
    /// empty the map. Returns the number of requests drained.
    pub async fn drain(&self, kind: ErrorKind, message: &str) -> usize {
        let sinks: Vec<(String, mpsc::Sender<ResponseChunk>)> = {
            let mut entries = self.entries.lock();
            gauge!(BRIDGE_IN_FLIGHT_REQUESTS).set(0.0);
            entries.drain().collect()
        };
        for (id, sink) in &sinks {
            if sink
                .send(ResponseChunk::terminal_error(kind, message))
                .await
                .is_err()
            {
                debug!(request_id = %id, "drain target already cancelled");
            }
        }
        sinks.len()
    }
}
