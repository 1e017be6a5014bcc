//! # nodescope-server
//!
//! Remote diagnostics service for long-running blockchain nodes.
//!
//! Companions colocated with subject nodes dial `POST /support/{pin}` and keep
//! a long-lived duplex HTTP stream open; the server multiplexes operator
//! diagnostic requests onto that stream and correlates the streamed responses
//! back to their waiters:
//!
//! - [`registry::SessionRegistry`] — PIN-keyed operator sessions and node records
//! - [`node::NodeSession`] — per-node request queue, correlator, connection state
//! - [`bridge`] — the duplex endpoint, per-node writer tasks, reader loop
//! - [`facade::OperatorFacade`] — the inward API UI handlers call
//! - [`server::NodescopeServer`] — axum router, listen, graceful shutdown

#![deny(unsafe_code)]

pub mod api;
pub mod bridge;
pub mod config;
pub mod correlator;
pub mod facade;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod registry;
pub mod server;
pub mod shutdown;
