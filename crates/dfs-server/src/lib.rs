//! Replication server for the distributed file store.
//!
//! A [`FileServer`] owns a local blob store and a TCP transport. It dials
//! its bootstrap nodes at startup, keeps a [`PeerRegistry`] of live
//! connections, broadcasts every local write to all peers, and applies the
//! writes it receives from them in arrival order.
//!
//! Replication is best-effort: a write is durable locally before any peer
//! sees it, and a failed send is reported but never rolled back.

pub mod config;
pub mod error;
pub mod payload;
pub mod registry;
pub mod server;

#[cfg(test)]
mod testing;

pub use config::{ServerConfig, DEFAULT_SHUTDOWN_GRACE_MS};
pub use error::{PeerFailure, ServerError, ServerResult};
pub use payload::ReplicationPayload;
pub use registry::PeerRegistry;
pub use server::FileServer;
