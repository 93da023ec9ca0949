use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use dfs_p2p::{Peer, Rpc, TcpTransport, TcpTransportOpts, Transport};
use dfs_store::{BlobStore, DiskStore};

use crate::config::ServerConfig;
use crate::error::{PeerFailure, ServerError, ServerResult};
use crate::payload::ReplicationPayload;
use crate::registry::PeerRegistry;

const PEER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A storage node: a local blob store kept in step with every connected
/// peer.
///
/// Writes go to the local store first and are then broadcast to all
/// registered peers. Writes received from peers are applied by a single
/// drain loop in arrival order.
pub struct FileServer {
    config: ServerConfig,
    store: Arc<dyn BlobStore>,
    transport: Arc<TcpTransport>,
    registry: Arc<PeerRegistry>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FileServer {
    /// Build a node backed by a [`DiskStore`] at `config.store`.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let store = Arc::new(DiskStore::new(config.store.clone()));
        Self::with_store(config, store)
    }

    /// Build a node around an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn BlobStore>) -> ServerResult<Self> {
        config.validate()?;

        let registry = Arc::new(PeerRegistry::new());
        let opts = TcpTransportOpts::new(config.listen_addr.clone())
            .with_handshake(config.handshake.build())
            .with_codec(config.codec.build())
            .with_handler(registry.clone())
            .with_max_connections(config.max_connections)
            .with_queue_capacity(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        Ok(Self {
            config,
            store,
            transport: Arc::new(TcpTransport::new(opts)),
            registry,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Bound listen address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Addresses of the currently registered peers, sorted.
    pub fn peer_addrs(&self) -> Vec<String> {
        self.registry.addrs()
    }

    /// Listen, dial every bootstrap node in the background, and spawn the
    /// drain loop. The returned handle completes after [`stop`](Self::stop)
    /// once the transport has been closed.
    pub async fn start(&self) -> ServerResult<JoinHandle<()>> {
        // A spent latch means this server already ran; do not bind again.
        if self
            .shutdown_rx
            .lock()
            .expect("shutdown lock poisoned")
            .is_none()
        {
            return Err(ServerError::AlreadyStarted);
        }
        let addr = self.transport.listen_and_accept().await?;

        let inbound = self.transport.consume().ok_or(ServerError::AlreadyStarted)?;
        let shutdown = self
            .shutdown_rx
            .lock()
            .expect("shutdown lock poisoned")
            .take()
            .ok_or(ServerError::AlreadyStarted)?;

        info!(
            addr = %addr,
            root = %self.config.store.root.display(),
            bootstrap = self.config.bootstrap_addrs().count(),
            "file server started"
        );

        self.bootstrap_network();

        let drain = DrainLoop {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            grace: self.config.shutdown_grace(),
        };
        Ok(tokio::spawn(drain.run(inbound, shutdown)))
    }

    fn bootstrap_network(&self) {
        for addr in self.config.bootstrap_addrs() {
            let transport = Arc::clone(&self.transport);
            let addr = addr.to_string();
            tokio::spawn(async move {
                match transport.dial(&addr).await {
                    Ok(()) => debug!(peer = %addr, "dialed bootstrap node"),
                    Err(e) => warn!(peer = %addr, error = %e, "failed to dial bootstrap node"),
                }
            });
        }
    }

    /// Raise the shutdown signal. The signal is a one-shot latch: a second
    /// call fails with [`ServerError::AlreadyStopped`].
    pub fn stop(&self) -> ServerResult<()> {
        let tx = self
            .shutdown_tx
            .lock()
            .expect("shutdown lock poisoned")
            .take()
            .ok_or(ServerError::AlreadyStopped)?;
        // The drain loop may already be gone; the latch is spent either way.
        let _ = tx.send(());
        info!("file server stopping");
        Ok(())
    }

    /// Register a peer, replacing any previous entry for its address.
    pub fn on_peer_connected(&self, peer: Arc<dyn Peer>) {
        self.registry.register(peer);
    }

    /// Wait until at least `count` peers are registered.
    pub async fn wait_for_peers(&self, count: usize, timeout: Duration) -> ServerResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let connected = self.registry.len();
            if connected >= count {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ServerError::PeerTimeout {
                    wanted: count,
                    connected,
                });
            }
            sleep(PEER_POLL_INTERVAL).await;
        }
    }

    /// Persist `reader` under `key`, then broadcast it to every peer.
    ///
    /// The input is read once into memory and that buffer feeds both the
    /// local write and the outbound payload. A local failure is returned
    /// before anything is sent. A broadcast failure is returned too, but the
    /// local write stays in place. Returns the number of peers reached.
    pub async fn store_file<R>(&self, key: &str, mut reader: R) -> ServerResult<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        let data = Bytes::from(buf);

        let written = write_local(&self.store, key.to_string(), data.clone()).await?;
        debug!(key, bytes = written, "stored file locally");

        let payload = ReplicationPayload::new(key, data.to_vec());
        self.broadcast(&payload).await
    }

    /// Send `payload` to every registered peer.
    ///
    /// The payload is encoded once and the same frame is written to all
    /// peers concurrently. Every peer is attempted; failures are collected
    /// into [`ServerError::Broadcast`]. Returns the number of peers reached.
    pub async fn broadcast(&self, payload: &ReplicationPayload) -> ServerResult<usize> {
        let encoded = payload.encode()?;
        let frame = Bytes::from(self.transport.codec().encode(&encoded)?);

        let peers = self.registry.snapshot();
        let attempted = peers.len();
        let mut sends = JoinSet::new();
        for peer in peers {
            let frame = frame.clone();
            sends.spawn(async move {
                let addr = peer.remote_addr();
                (addr, peer.send(&frame).await)
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((peer, Err(e))) => {
                    warn!(peer = %peer, key = %payload.key, error = %e, "failed to send to peer");
                    failed.push(PeerFailure {
                        peer,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    return Err(ServerError::Internal(format!("broadcast task failed: {e}")));
                }
            }
        }

        if failed.is_empty() {
            debug!(key = %payload.key, peers = attempted, bytes = frame.len(), "broadcast complete");
            Ok(attempted)
        } else {
            Err(ServerError::Broadcast { attempted, failed })
        }
    }
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer")
            .field("listen_addr", &self.config.listen_addr)
            .field("local_addr", &self.local_addr())
            .field("peers", &self.registry)
            .finish()
    }
}

/// The single consumer of the transport's inbound queue.
struct DrainLoop {
    store: Arc<dyn BlobStore>,
    transport: Arc<TcpTransport>,
    grace: Duration,
}

impl DrainLoop {
    async fn run(self, mut inbound: mpsc::Receiver<Rpc>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                rpc = inbound.recv() => match rpc {
                    Some(rpc) => self.apply(rpc).await,
                    None => break,
                },
            }
        }

        // Let in-flight sends finish before the listener goes away.
        sleep(self.grace).await;
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "failed to close transport");
        }
        info!("file server stopped");
    }

    async fn apply(&self, rpc: Rpc) {
        let payload = match ReplicationPayload::decode(&rpc.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %rpc.from, error = %e, "dropping undecodable message");
                return;
            }
        };

        let ReplicationPayload { key, data } = payload;
        match write_local(&self.store, key.clone(), Bytes::from(data)).await {
            Ok(bytes) => info!(peer = %rpc.from, key = %key, bytes, "applied replicated write"),
            Err(e) => warn!(peer = %rpc.from, key = %key, error = %e, "failed to apply replicated write"),
        }
    }
}

async fn write_local(store: &Arc<dyn BlobStore>, key: String, data: Bytes) -> ServerResult<u64> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.write_bytes(&key, &data))
        .await
        .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
        .map_err(ServerError::from)
}
