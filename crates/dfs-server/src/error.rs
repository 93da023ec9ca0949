use std::net::SocketAddr;

use thiserror::Error;

/// A broadcast that could not be delivered to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub peer: SocketAddr,
    pub reason: String,
}

impl std::fmt::Display for PeerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.peer, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("store error: {0}")]
    Store(#[from] dfs_store::StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] dfs_p2p::ProtocolError),

    #[error("broadcast failed for {} of {attempted} peers: {}", failed.len(), join_failures(failed))]
    Broadcast {
        attempted: usize,
        failed: Vec<PeerFailure>,
    },

    #[error("payload encoding error: {0}")]
    Encoding(String),

    #[error("server already stopped")]
    AlreadyStopped,

    #[error("server already started")]
    AlreadyStarted,

    #[error("timed out waiting for {wanted} peers ({connected} connected)")]
    PeerTimeout { wanted: usize, connected: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

fn join_failures(failed: &[PeerFailure]) -> String {
    failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ServerResult<T> = Result<T, ServerError>;
