//! Test doubles shared by this crate's unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dfs_p2p::{Peer, ProtocolError, ProtocolResult};

/// In-process peer that records what it is sent, or fails every send.
pub struct MockPeer {
    addr: SocketAddr,
    fail: bool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockPeer {
    pub fn healthy(addr: &str) -> Arc<Self> {
        Self::build(addr, false)
    }

    pub fn broken(addr: &str) -> Arc<Self> {
        Self::build(addr, true)
    }

    fn build(addr: &str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.parse().expect("valid mock address"),
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn is_outbound(&self) -> bool {
        false
    }

    async fn send(&self, frame: &[u8]) -> ProtocolResult<()> {
        if self.fail {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock peer is gone",
            )));
        }
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn close(&self) -> ProtocolResult<()> {
        Ok(())
    }
}
