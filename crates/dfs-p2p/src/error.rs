use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    #[error("handshake failed: {0}")]
    BadHandshake(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),

    #[error("transport is already listening on {0}")]
    AlreadyListening(std::net::SocketAddr),

    #[error("peer callback rejected connection: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether a decode loop must stop after this error.
    ///
    /// Closed or failing streams end the loop, as do framing errors after
    /// which the stream position can no longer be trusted. Errors raised
    /// after a whole frame was consumed leave the stream usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Io(_)
                | Self::FramingError(_)
                | Self::MessageTooLarge { .. }
        )
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
