use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// One decoded message, tagged with the address it arrived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rpc {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

/// Structured frame body used by the framed codec.
///
/// The sender's address is never transmitted; the receiver fills
/// [`Rpc::from`] from the socket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Vec<u8>,
}

impl Envelope {
    pub const TYPE_TAG: u8 = 1;
}

/// Borrowing twin of [`Envelope`]; serializes to identical bytes.
#[derive(Serialize)]
pub(crate) struct EnvelopeRef<'a> {
    pub payload: &'a [u8],
}
