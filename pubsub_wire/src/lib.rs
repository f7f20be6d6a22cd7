//! Length-prefixed message framing shared by the PubSubSQL server and
//! client.
//!
//! Wire format:
//! ```text
//! +---------------------+------------------+------------------+
//! | Request id (4B BE)  | Length (4B BE)   | Payload          |
//! +---------------------+------------------+------------------+
//! ```
//!
//! Client-to-server payloads are ASCII command strings; server-to-client
//! payloads are JSON documents. A request id of `0` marks a server-pushed
//! pubsub event.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use thiserror::Error;

/// Request id used for server-pushed pubsub events.
pub const PUBSUB_REQUEST_ID: u32 = 0;

/// Framing errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame payload exceeds the configured maximum.
    #[error("message too large: {size} bytes exceeds maximum of {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    /// Structurally invalid frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for framing operations.
pub type WireResult<T> = Result<T, WireError>;

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub request_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(request_id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            payload: payload.into(),
        }
    }

    /// True for server-pushed pubsub frames.
    pub fn is_pubsub(&self) -> bool {
        self.request_id == PUBSUB_REQUEST_ID
    }
}

/// Frame codec with a maximum payload length.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    max_payload_length: usize,
}

impl FrameCodec {
    /// Create a new codec with the given maximum payload length.
    pub fn new(max_payload_length: usize) -> Self {
        Self { max_payload_length }
    }

    /// Get the maximum payload length.
    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    /// Encode a frame to bytes: header followed by payload.
    pub fn encode(&self, frame: &Frame) -> WireResult<Vec<u8>> {
        if frame.payload.len() > self.max_payload_length {
            return Err(WireError::MessageTooLarge {
                size: frame.payload.len(),
                max_size: self.max_payload_length,
            });
        }

        let mut bytes = Vec::with_capacity(8 + frame.payload.len());
        bytes.extend_from_slice(&frame.request_id.to_be_bytes());
        bytes.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&frame.payload);
        Ok(bytes)
    }

    /// Read a frame from an async reader.
    ///
    /// Returns `None` if the connection was closed cleanly before a header.
    pub async fn read_frame<R>(&self, reader: &mut R) -> WireResult<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 8];
        match reader.read_exact(&mut header).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        }

        let request_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        if length > self.max_payload_length {
            return Err(WireError::MessageTooLarge {
                size: length,
                max_size: self.max_payload_length,
            });
        }
        if length == 0 {
            return Err(WireError::InvalidFrame("zero-length frame".to_string()));
        }

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await?;

        Ok(Some(Frame {
            request_id,
            payload,
        }))
    }

    /// Write a frame to an async writer.
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> WireResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.encode(frame)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(1024 * 1024) // 1 MB default
    }
}
