//! # nodescope-core
//!
//! Shared building blocks for the nodescope diagnostics bridge:
//!
//! - Wire-format types for the companion protocol ([`wire`])
//! - The operator-facing error taxonomy ([`errors`])
//! - Incremental decoding of whitespace-separated JSON streams ([`codec`])
//!
//! This crate performs no I/O; the server crate owns all runtime concerns.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod wire;

pub use codec::{DecodeError, JsonStreamDecoder};
pub use errors::{BridgeError, ErrorKind};
pub use wire::{ChunkError, Handshake, NodeInfo, NodeRequest, NodeResponse, ResponseChunk, ResponseError};
