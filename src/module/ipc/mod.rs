//! Companion IPC
//!
//! Unix domain sockets between specializing processes and the root
//! companion daemon. After a small routing handshake the connection is
//! an unframed byte stream.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{CompanionChannel, CompanionConnector};
pub use protocol::{AbiClass, ROUTE_ACK};
pub use server::{CompanionHandler, CompanionRegistry, CompanionServer};
