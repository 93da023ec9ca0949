use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// The `(key, data)` pair broadcast to replicate one write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPayload {
    pub key: String,
    pub data: Vec<u8>,
}

impl ReplicationPayload {
    pub fn new(key: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }

    pub fn encode(&self) -> ServerResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ServerError::Encoding(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ServerResult<Self> {
        bincode::deserialize(bytes).map_err(|e| ServerError::Encoding(e.to_string()))
    }
}
