//! Length-prefixed frame codec for the EPP transport
//!
//! Each frame on the wire is a 4-byte big-endian length followed by one
//! UTF-8 XML document; the length counts itself, so an empty document is
//! framed as just `00 00 00 04`. The protocol is strictly request/response,
//! one frame outstanding at a time, so the codec exposes plain blocking-
//! style async calls and no multiplexing.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

use std::time::Duration;

/// The length field itself occupies these many bytes of the declared total.
const LENGTH_FIELD: u32 = 4;

/// Upper bound on a single frame, applied in both directions: an oversized
/// registry response is a framing fault rather than an unbounded buffer, and
/// an oversized outgoing document is refused before any bytes hit the wire.
const MAX_FRAME: u32 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Read timed out")]
    Timeout,

    #[error("Invalid frame length: {0}")]
    BadFrameLength(u32),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
            std::io::ErrorKind::ConnectionRefused => TransportError::Connect(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Frame codec over any reliable byte stream (in production a TLS stream,
/// in tests an in-memory duplex).
#[derive(Debug)]
pub struct FrameCodec<S> {
    stream: S,
    read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameCodec<S> {
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_timeout,
        }
    }

    /// Write one frame: the length prefix (counting itself) followed by the
    /// payload. Refuses payloads beyond the frame cap, so anything this
    /// codec sends is something it would also accept back.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let total = u32::try_from(payload.len())
            .ok()
            .and_then(|len| len.checked_add(LENGTH_FIELD))
            .ok_or(TransportError::FrameTooLarge(u32::MAX))?;
        if total > MAX_FRAME {
            return Err(TransportError::FrameTooLarge(total));
        }

        self.stream.write_all(&total.to_be_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        trace!("Sent frame of {} payload bytes", payload.len());
        Ok(())
    }

    /// Read exactly one frame, returning its payload. A short read or peer
    /// close maps to `ConnectionClosed`, a stalled registry to `Timeout`,
    /// and a declared length smaller than the length field itself to
    /// `BadFrameLength`.
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut length_buf = [0u8; 4];
        self.read_exact_timed(&mut length_buf).await?;

        let total = u32::from_be_bytes(length_buf);
        if total < LENGTH_FIELD {
            return Err(TransportError::BadFrameLength(total));
        }
        if total > MAX_FRAME {
            return Err(TransportError::FrameTooLarge(total));
        }

        let mut payload = vec![0u8; (total - LENGTH_FIELD) as usize];
        self.read_exact_timed(&mut payload).await?;
        trace!("Received frame of {} payload bytes", payload.len());
        Ok(payload)
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        match timeout(self.read_timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Shut down the write side of the stream. Idempotent; errors on an
    /// already-closed stream are ignored.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
