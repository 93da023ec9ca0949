use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::PROTOCOL_VERSION;

/// A bidirectional byte stream a handshake can run over.
pub trait HandshakeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> HandshakeStream for T {}

/// Exchange run on every new connection before it becomes an active peer.
///
/// An error closes the connection.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn shake(&self, stream: &mut dyn HandshakeStream) -> ProtocolResult<()>;
}

/// Accepts every connection without exchanging anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopHandshake;

#[async_trait]
impl Handshake for NopHandshake {
    async fn shake(&self, _stream: &mut dyn HandshakeStream) -> ProtocolResult<()> {
        Ok(())
    }
}

/// Both sides send `magic || version` and require the other to match.
///
/// This only guards against talking to an incompatible node; it is not
/// authentication.
#[derive(Clone, Copy, Debug)]
pub struct VersionHandshake {
    version: u32,
}

impl VersionHandshake {
    pub const MAGIC: [u8; 4] = *b"DFS1";

    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl Default for VersionHandshake {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}

#[async_trait]
impl Handshake for VersionHandshake {
    async fn shake(&self, stream: &mut dyn HandshakeStream) -> ProtocolResult<()> {
        let mut hello = [0u8; 8];
        hello[..4].copy_from_slice(&Self::MAGIC);
        hello[4..].copy_from_slice(&self.version.to_be_bytes());
        stream.write_all(&hello).await?;
        stream.flush().await?;

        let mut remote = [0u8; 8];
        match stream.read_exact(&mut remote).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        }

        if remote[..4] != Self::MAGIC {
            return Err(ProtocolError::BadHandshake(format!(
                "unexpected hello magic {:02x?}",
                &remote[..4]
            )));
        }
        let remote_version = u32::from_be_bytes([remote[4], remote[5], remote[6], remote[7]]);
        if remote_version != self.version {
            return Err(ProtocolError::VersionMismatch {
                local: self.version,
                remote: remote_version,
            });
        }
        Ok(())
    }
}

/// Selectable handshake, for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeKind {
    #[default]
    None,
    Version,
}

impl HandshakeKind {
    pub fn build(self) -> Arc<dyn Handshake> {
        match self {
            Self::None => Arc::new(NopHandshake),
            Self::Version => Arc::new(VersionHandshake::default()),
        }
    }
}
