use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Envelope, EnvelopeRef, MAX_MESSAGE_SIZE};

/// Largest read performed by [`ChunkCodec`] when no size is given.
pub const DEFAULT_CHUNK_SIZE: usize = 1028;

/// Turns payloads into wire bytes and reads them back from a stream.
///
/// Both ends of a connection must use the same codec.
#[async_trait]
pub trait FrameCodec: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Produce the bytes to write for one payload.
    fn encode(&self, payload: &[u8]) -> ProtocolResult<Vec<u8>>;

    /// Read the next payload from `reader`.
    ///
    /// A stream that ends cleanly yields [`ProtocolError::ConnectionClosed`].
    async fn decode(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> ProtocolResult<Vec<u8>>;
}

/// Length-naive codec: each decode returns whatever a single read yields,
/// up to `chunk_size` bytes.
///
/// Suited to small control messages. Payloads larger than one chunk, or
/// several payloads coalesced by the OS, are not re-assembled.
#[derive(Clone, Copy, Debug)]
pub struct ChunkCodec {
    chunk_size: usize,
}

impl ChunkCodec {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[async_trait]
impl FrameCodec for ChunkCodec {
    fn name(&self) -> &'static str {
        "chunk"
    }

    fn encode(&self, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    async fn decode(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> ProtocolResult<Vec<u8>> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        buf.truncate(n);
        Ok(buf)
    }
}

/// Self-describing codec: `[4 bytes len][1 byte tag][bincode(Envelope)]`.
///
/// `len` is big-endian and counts the tag plus the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct FramedCodec;

impl FramedCodec {
    const HEADER_LEN: usize = 5;
}

#[async_trait]
impl FrameCodec for FramedCodec {
    fn name(&self) -> &'static str {
        "framed"
    }

    fn encode(&self, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
        let body = bincode::serialize(&EnvelopeRef { payload })
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (body.len() + 1) as u32;
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + body.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(Envelope::TYPE_TAG);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    async fn decode(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> ProtocolResult<Vec<u8>> {
        let mut header = [0u8; Self::HEADER_LEN];
        read_exact_or_closed(reader, &mut header).await?;

        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut body = vec![0u8; len - 1];
        read_exact_or_closed(reader, &mut body).await?;

        let tag = header[4];
        if tag != Envelope::TYPE_TAG {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        let envelope: Envelope = bincode::deserialize(&body)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(envelope.payload)
    }
}

async fn read_exact_or_closed(
    reader: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut [u8],
) -> ProtocolResult<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Selectable codec, for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    Chunk,
    #[default]
    Framed,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn FrameCodec> {
        match self {
            Self::Chunk => Arc::new(ChunkCodec::default()),
            Self::Framed => Arc::new(FramedCodec),
        }
    }
}
