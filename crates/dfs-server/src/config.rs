use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dfs_p2p::{CodecKind, HandshakeKind, DEFAULT_MAX_CONNECTIONS, DEFAULT_QUEUE_CAPACITY};
use dfs_store::StoreConfig;

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Node configuration. Only `listen_addr` is required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub listen_addr: String,
    /// Seed peers dialed at startup. Empty entries are skipped.
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub codec: CodecKind,
    #[serde(default)]
    pub handshake: HandshakeKind,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Delay between leaving the drain loop and closing the transport.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            bootstrap_nodes: Vec::new(),
            store: StoreConfig::default(),
            codec: CodecKind::default(),
            handshake: HandshakeKind::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }

    pub fn with_bootstrap<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap_nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the configuration and return the parsed listen address.
    pub fn validate(&self) -> ServerResult<SocketAddr> {
        let addr: SocketAddr = self.listen_addr.parse().map_err(|e| {
            ServerError::Config(format!("invalid listen address {:?}: {e}", self.listen_addr))
        })?;
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::Config("queue_capacity must be positive".into()));
        }
        Ok(addr)
    }

    /// Non-empty bootstrap addresses, in configured order.
    pub fn bootstrap_addrs(&self) -> impl Iterator<Item = &str> {
        self.bootstrap_nodes
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
