use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::error::ProtocolResult;

/// A live connection to a remote node.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Remote address of the connection; identifies the peer.
    fn remote_addr(&self) -> SocketAddr;

    /// `true` if this node dialed the connection.
    fn is_outbound(&self) -> bool;

    /// Write already-encoded bytes to the peer.
    async fn send(&self, frame: &[u8]) -> ProtocolResult<()>;

    /// Shut down the write side. The remote sees end-of-stream.
    async fn close(&self) -> ProtocolResult<()>;
}

/// Whether two handles refer to the same peer object.
pub fn same_peer(a: &Arc<dyn Peer>, b: &Arc<dyn Peer>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Called by the transport as peers come and go.
pub trait PeerHandler: Send + Sync {
    /// A connection finished its handshake. Returning an error drops it.
    fn on_peer(&self, peer: Arc<dyn Peer>) -> ProtocolResult<()>;

    /// A previously accepted peer's stream has closed.
    fn on_peer_disconnected(&self, peer: &Arc<dyn Peer>);
}

/// Peer over a TCP connection. The read half is owned by the transport's
/// decode loop; this holds the write half.
pub struct TcpPeer {
    remote_addr: SocketAddr,
    outbound: bool,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpPeer {
    pub fn new(remote_addr: SocketAddr, outbound: bool, writer: OwnedWriteHalf) -> Self {
        Self {
            remote_addr,
            outbound,
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Peer for TcpPeer {
    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn is_outbound(&self) -> bool {
        self.outbound
    }

    async fn send(&self, frame: &[u8]) -> ProtocolResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> ProtocolResult<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPeer")
            .field("remote_addr", &self.remote_addr)
            .field("outbound", &self.outbound)
            .finish()
    }
}
