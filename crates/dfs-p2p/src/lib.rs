//! Peer transport for the distributed file store.
//!
//! Owns raw TCP connections to other nodes. Each connection runs a
//! pluggable [`Handshake`], is announced through a [`PeerHandler`], and then
//! has its byte stream decoded by a pluggable [`FrameCodec`] into [`Rpc`]
//! messages on a single shared inbound queue.
//!
//! Connection states: connecting, handshaking, active, closed. A failed
//! handshake closes the connection before it is ever announced.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod transport;

pub use codec::{ChunkCodec, CodecKind, FrameCodec, FramedCodec, DEFAULT_CHUNK_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use handshake::{Handshake, HandshakeKind, HandshakeStream, NopHandshake, VersionHandshake};
pub use message::{Envelope, Rpc, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use peer::{same_peer, Peer, PeerHandler, TcpPeer};
pub use transport::{
    TcpTransport, TcpTransportOpts, Transport, DEFAULT_MAX_CONNECTIONS, DEFAULT_QUEUE_CAPACITY,
};
