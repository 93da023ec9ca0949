use std::net::SocketAddr;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::codec::{FrameCodec, FramedCodec};
use crate::error::{ProtocolError, ProtocolResult};
use crate::handshake::{Handshake, NopHandshake};
use crate::message::Rpc;
use crate::peer::{Peer, PeerHandler, TcpPeer};

pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Moves messages between this node and its peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the listen address and start accepting in the background.
    /// Returns the bound address.
    async fn listen_and_accept(&self) -> ProtocolResult<SocketAddr>;

    /// Connect to `addr`. The handshake and decode loop run in the
    /// background; this returns once the TCP connection is open.
    async fn dial(&self, addr: &str) -> ProtocolResult<()>;

    /// Take the inbound message queue. Only the first call gets it.
    fn consume(&self) -> Option<mpsc::Receiver<Rpc>>;

    /// Stop accepting and release the listener. Active peers are left
    /// open; each closes when its own stream does.
    async fn close(&self) -> ProtocolResult<()>;

    /// Address the listener is bound to, while listening.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Codec every connection of this transport speaks.
    fn codec(&self) -> Arc<dyn FrameCodec>;
}

/// Options for a [`TcpTransport`].
#[derive(Clone)]
pub struct TcpTransportOpts {
    pub listen_addr: String,
    pub handshake: Arc<dyn Handshake>,
    pub codec: Arc<dyn FrameCodec>,
    pub handler: Option<Arc<dyn PeerHandler>>,
    /// Upper bound on connections being served at once.
    pub max_connections: usize,
    /// Bound of the inbound queue shared by all connections.
    pub queue_capacity: usize,
}

impl TcpTransportOpts {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            handshake: Arc::new(NopHandshake),
            codec: Arc::new(FramedCodec),
            handler: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_handshake(mut self, handshake: Arc<dyn Handshake>) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn PeerHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

impl std::fmt::Debug for TcpTransportOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransportOpts")
            .field("listen_addr", &self.listen_addr)
            .field("codec", &self.codec.name())
            .field("has_handler", &self.handler.is_some())
            .field("max_connections", &self.max_connections)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// TCP implementation of [`Transport`].
///
/// Every accepted or dialed connection gets its own task: handshake, peer
/// callback, then a decode loop pushing into one shared bounded queue. A
/// slow consumer stalls each decode loop independently.
pub struct TcpTransport {
    inner: Arc<Inner>,
    rpc_rx: Mutex<Option<mpsc::Receiver<Rpc>>>,
    listener: Mutex<Option<ListenerState>>,
}

struct ListenerState {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

struct Inner {
    opts: TcpTransportOpts,
    rpc_tx: mpsc::Sender<Rpc>,
    permits: Arc<Semaphore>,
}

impl TcpTransport {
    pub fn new(opts: TcpTransportOpts) -> Self {
        let (rpc_tx, rpc_rx) = mpsc::channel(opts.queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(opts.max_connections.max(1)));
        Self {
            inner: Arc::new(Inner {
                opts,
                rpc_tx,
                permits,
            }),
            rpc_rx: Mutex::new(Some(rpc_rx)),
            listener: Mutex::new(None),
        }
    }

    pub fn opts(&self) -> &TcpTransportOpts {
        &self.inner.opts
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.inner.opts.max_connections.max(1) - self.inner.permits.available_permits()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen_and_accept(&self) -> ProtocolResult<SocketAddr> {
        if let Some(state) = self.listener.lock().expect("listener lock poisoned").as_ref() {
            return Err(ProtocolError::AlreadyListening(state.local_addr));
        }

        let listener = TcpListener::bind(&self.inner.opts.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&self.inner)));

        let mut slot = self.listener.lock().expect("listener lock poisoned");
        if let Some(existing) = slot.as_ref() {
            accept_task.abort();
            return Err(ProtocolError::AlreadyListening(existing.local_addr));
        }
        *slot = Some(ListenerState {
            local_addr,
            accept_task,
        });

        info!(addr = %local_addr, codec = self.inner.opts.codec.name(), "TCP transport listening");
        Ok(local_addr)
    }

    async fn dial(&self, addr: &str) -> ProtocolResult<()> {
        let stream = TcpStream::connect(addr).await?;
        debug!(addr, "dialed peer");
        self.inner.spawn_connection(stream, true)
    }

    fn consume(&self) -> Option<mpsc::Receiver<Rpc>> {
        self.rpc_rx.lock().expect("queue lock poisoned").take()
    }

    async fn close(&self) -> ProtocolResult<()> {
        let state = self.listener.lock().expect("listener lock poisoned").take();
        if let Some(state) = state {
            state.accept_task.abort();
            // Wait for the task so the listener is dropped before returning.
            let _ = state.accept_task.await;
            info!(addr = %state.local_addr, "TCP transport closed");
        }
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .expect("listener lock poisoned")
            .as_ref()
            .map(|state| state.local_addr)
    }

    fn codec(&self) -> Arc<dyn FrameCodec> {
        Arc::clone(&self.inner.opts.codec)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(state) = slot.take() {
                state.accept_task.abort();
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, inner: Arc<Inner>) {
    loop {
        let (stream, addr) = next_accepted(|| listener.accept()).await;
        debug!(peer = %addr, "accepted connection");
        if let Err(e) = inner.spawn_connection(stream, false) {
            warn!(peer = %addr, error = %e, "refusing connection");
        }
    }
}

/// Pause after a failed accept so a persistent error (EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

async fn next_accepted<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

impl Inner {
    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, outbound: bool) -> ProtocolResult<()> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| ProtocolError::ConnectionLimit(self.opts.max_connections))?;
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.handle_connection(stream, outbound).await;
            drop(permit);
        });
        Ok(())
    }

    async fn handle_connection(&self, mut stream: TcpStream, outbound: bool) {
        let remote = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "connection has no peer address");
                return;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %remote, error = %e, "failed to set TCP_NODELAY");
        }

        if let Err(e) = self.opts.handshake.shake(&mut stream).await {
            warn!(peer = %remote, outbound, error = %e, "handshake failed; dropping connection");
            return;
        }

        let (read_half, write_half) = stream.into_split();
        let peer: Arc<dyn Peer> = Arc::new(TcpPeer::new(remote, outbound, write_half));

        if let Some(handler) = &self.opts.handler {
            if let Err(e) = handler.on_peer(Arc::clone(&peer)) {
                warn!(peer = %remote, error = %e, "peer rejected; dropping connection");
                return;
            }
        }
        info!(peer = %remote, outbound, "peer connected");

        self.read_loop(remote, read_half).await;

        if let Some(handler) = &self.opts.handler {
            handler.on_peer_disconnected(&peer);
        }
        info!(peer = %remote, "dropping connection");
    }

    async fn read_loop(&self, remote: SocketAddr, read_half: OwnedReadHalf) {
        let mut reader = BufReader::new(read_half);
        loop {
            match self.opts.codec.decode(&mut reader).await {
                Ok(payload) => {
                    let rpc = Rpc {
                        from: remote,
                        payload,
                    };
                    if self.rpc_tx.send(rpc).await.is_err() {
                        debug!(peer = %remote, "inbound queue closed; stopping decode loop");
                        return;
                    }
                }
                Err(e) if e.is_fatal() => {
                    debug!(peer = %remote, error = %e, "peer stream ended");
                    return;
                }
                Err(e) => warn!(peer = %remote, error = %e, "failed to decode message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChunkCodec;
    use crate::handshake::VersionHandshake;
    use tokio::io::AsyncWriteExt;
    use tokio::time::{sleep, timeout, Instant};

    #[derive(Default)]
    struct Recorder {
        peers: Mutex<Vec<Arc<dyn Peer>>>,
        disconnected: Mutex<Vec<SocketAddr>>,
    }

    impl Recorder {
        fn peer_count(&self) -> usize {
            self.peers.lock().unwrap().len()
        }

        fn first_peer(&self) -> Arc<dyn Peer> {
            Arc::clone(&self.peers.lock().unwrap()[0])
        }

        fn disconnected(&self) -> Vec<SocketAddr> {
            self.disconnected.lock().unwrap().clone()
        }
    }

    impl PeerHandler for Recorder {
        fn on_peer(&self, peer: Arc<dyn Peer>) -> ProtocolResult<()> {
            self.peers.lock().unwrap().push(peer);
            Ok(())
        }

        fn on_peer_disconnected(&self, peer: &Arc<dyn Peer>) {
            self.disconnected.lock().unwrap().push(peer.remote_addr());
        }
    }

    struct RejectAll;

    impl PeerHandler for RejectAll {
        fn on_peer(&self, _peer: Arc<dyn Peer>) -> ProtocolResult<()> {
            Err(ProtocolError::Rejected("not today".into()))
        }

        fn on_peer_disconnected(&self, _peer: &Arc<dyn Peer>) {}
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn transport(handler: Option<Arc<dyn PeerHandler>>) -> TcpTransport {
        let mut opts = TcpTransportOpts::new("127.0.0.1:0");
        opts.handler = handler;
        TcpTransport::new(opts)
    }

    #[tokio::test]
    async fn listen_reports_bound_address() {
        let tr = transport(None);
        assert!(tr.local_addr().is_none());
        let addr = tr.listen_and_accept().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(tr.local_addr(), Some(addr));

        let err = tr.listen_and_accept().await.unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyListening(a) if a == addr));
        tr.close().await.unwrap();
    }

    #[tokio::test]
    async fn consume_hands_out_queue_once() {
        let tr = transport(None);
        assert!(tr.consume().is_some());
        assert!(tr.consume().is_none());
    }

    #[tokio::test]
    async fn dialed_peer_delivers_messages_to_listener_queue() {
        let server_peers = Arc::new(Recorder::default());
        let client_peers = Arc::new(Recorder::default());
        let server = transport(Some(server_peers.clone()));
        let client = transport(Some(client_peers.clone()));

        let addr = server.listen_and_accept().await.unwrap();
        let mut inbound = server.consume().unwrap();
        client.dial(&addr.to_string()).await.unwrap();

        wait_until(|| client_peers.peer_count() == 1 && server_peers.peer_count() == 1).await;
        let peer = client_peers.first_peer();
        assert!(peer.is_outbound());
        assert_eq!(peer.remote_addr(), addr);
        assert!(!server_peers.first_peer().is_outbound());

        let frame = client.codec().encode(b"hello peer").unwrap();
        peer.send(&frame).await.unwrap();

        let rpc = timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.payload, b"hello peer");
        assert_eq!(rpc.from, server_peers.first_peer().remote_addr());
    }

    #[tokio::test]
    async fn closing_peer_notifies_disconnect() {
        let server_peers = Arc::new(Recorder::default());
        let server = transport(Some(server_peers.clone()));
        let addr = server.listen_and_accept().await.unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server_peers.peer_count() == 1).await;
        let local = raw.local_addr().unwrap();
        raw.shutdown().await.unwrap();
        drop(raw);

        wait_until(|| server_peers.disconnected() == vec![local]).await;
        wait_until(|| server.active_connections() == 0).await;
    }

    #[tokio::test]
    async fn decode_errors_do_not_kill_the_connection() {
        let server = transport(None);
        let addr = server.listen_and_accept().await.unwrap();
        let mut inbound = server.consume().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let mut bad = FramedCodec.encode(b"bad").unwrap();
        bad[4] = 99;
        raw.write_all(&bad).await.unwrap();
        raw.write_all(&FramedCodec.encode(b"good").unwrap()).await.unwrap();

        let rpc = timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.payload, b"good");
    }

    #[tokio::test]
    async fn chunk_codec_transport() {
        let opts = TcpTransportOpts::new("127.0.0.1:0").with_codec(Arc::new(ChunkCodec::default()));
        let server = TcpTransport::new(opts);
        let addr = server.listen_and_accept().await.unwrap();
        let mut inbound = server.consume().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"ping").await.unwrap();

        let rpc = timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.payload, b"ping");
    }

    #[tokio::test]
    async fn handshake_failure_never_reaches_callback() {
        let server_peers = Arc::new(Recorder::default());
        let opts = TcpTransportOpts::new("127.0.0.1:0")
            .with_handshake(Arc::new(VersionHandshake::new(7)))
            .with_handler(server_peers.clone());
        let server = TcpTransport::new(opts);
        let addr = server.listen_and_accept().await.unwrap();

        let client_opts = TcpTransportOpts::new("127.0.0.1:0")
            .with_handshake(Arc::new(VersionHandshake::new(8)));
        let client = TcpTransport::new(client_opts);
        client.dial(&addr.to_string()).await.unwrap();

        assert_eq!(client.active_connections(), 1);
        wait_until(|| client.active_connections() == 0).await;
        wait_until(|| server.active_connections() == 0).await;
        assert_eq!(server_peers.peer_count(), 0);
    }

    #[tokio::test]
    async fn matching_handshake_reaches_callback() {
        let server_peers = Arc::new(Recorder::default());
        let opts = TcpTransportOpts::new("127.0.0.1:0")
            .with_handshake(Arc::new(VersionHandshake::default()))
            .with_handler(server_peers.clone());
        let server = TcpTransport::new(opts);
        let addr = server.listen_and_accept().await.unwrap();

        let client = TcpTransport::new(
            TcpTransportOpts::new("127.0.0.1:0").with_handshake(Arc::new(VersionHandshake::default())),
        );
        client.dial(&addr.to_string()).await.unwrap();
        wait_until(|| server_peers.peer_count() == 1).await;
    }

    #[tokio::test]
    async fn rejected_peer_is_dropped() {
        let server = TcpTransport::new(
            TcpTransportOpts::new("127.0.0.1:0").with_handler(Arc::new(RejectAll)),
        );
        let addr = server.listen_and_accept().await.unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), tokio::io::AsyncReadExt::read(&mut raw, &mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "server should close the rejected connection");
    }

    #[tokio::test]
    async fn connection_limit_refuses_extra_dials() {
        let server = transport(None);
        let addr = server.listen_and_accept().await.unwrap();

        let client = TcpTransport::new(TcpTransportOpts::new("127.0.0.1:0").with_max_connections(1));
        client.dial(&addr.to_string()).await.unwrap();
        let err = client.dial(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionLimit(1)));
        assert_eq!(client.active_connections(), 1);
    }

    #[tokio::test]
    async fn close_releases_listener() {
        let tr = transport(None);
        let addr = tr.listen_and_accept().await.unwrap();
        tr.close().await.unwrap();
        assert!(tr.local_addr().is_none());

        // The port can be bound again once the listener is gone.
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());

        // Closing twice is harmless.
        tr.close().await.unwrap();
    }

    #[tokio::test]
    async fn dial_unreachable_address_fails() {
        let tr = transport(None);
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = tr.dial(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[tokio::test]
    async fn accept_errors_back_off_before_retrying() {
        let mut failures = 2;
        let started = Instant::now();
        let accepted = next_accepted(|| {
            let result = if failures > 0 {
                failures -= 1;
                Err(std::io::Error::other("too many open files"))
            } else {
                Ok(7u32)
            };
            async move { result }
        })
        .await;

        assert_eq!(accepted, 7);
        assert_eq!(failures, 0);
        assert!(started.elapsed() >= ACCEPT_BACKOFF * 2);
    }
}
