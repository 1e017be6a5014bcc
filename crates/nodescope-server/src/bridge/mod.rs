//! The companion bridge: duplex endpoint, per-node writers, response reader.

pub mod endpoint;
pub mod transport;
pub mod writer;

pub use endpoint::bridge_handler;
pub use transport::{BodyTransport, RequestTransport, TransportError};
