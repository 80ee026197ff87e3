use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use lamb_transport::Connection;

use crate::codec::{decode_message, FrameConfig};
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Partial reads are handled internally; callers always get complete messages.
/// Bytes of a message that has not fully arrived stay buffered across calls,
/// so a non-blocking stream can be polled repeatedly.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<Bytes> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.config.max_message_size)? {
                return Ok(message);
            }
            self.fill()?;
        }
    }

    /// Read the next message if one is available without blocking.
    ///
    /// Intended for non-blocking streams: `WouldBlock` and `Interrupted`
    /// yield `Ok(None)`. EOF is still `Err(FrameError::ConnectionClosed)`.
    pub fn poll_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.config.max_message_size)? {
                return Ok(Some(message));
            }
            match self.fill() {
                Ok(()) => continue,
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read the next message and decode it as an envelope.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        let message = self.read_message()?;
        Envelope::decode(&message)
    }

    /// Number of buffered bytes that do not form a complete message yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }
}

impl MessageReader<Connection> {
    /// Create a message reader for a `Connection` and apply the read timeout
    /// from config.
    pub fn with_config_tcp(inner: Connection, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: lamb_transport::TransportError) -> FrameError {
    match err {
        lamb_transport::TransportError::Io(io) | lamb_transport::TransportError::Accept(io) => {
            FrameError::Io(io)
        }
        lamb_transport::TransportError::Bind { source, .. }
        | lamb_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
