use std::io::{ErrorKind, Write};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use lamb_transport::Connection;

use crate::codec::{encode_message, FrameConfig};
use crate::command::Command;
use crate::envelope::{self, Envelope};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Wait between retries while the stream reports `WouldBlock`.
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// Writes complete messages to any `Write` stream.
///
/// Works on non-blocking streams too: a `WouldBlock` mid-message backs off
/// and retries. With `write_timeout` set, a stream that stays blocked past
/// the timeout fails the send with `TimedOut`; the message may then be
/// partially written and the stream should be dropped.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new message writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new message writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Send one message (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size: payload.len(),
                max: self.config.max_message_size,
            });
        }

        self.buf.clear();
        encode_message(payload, &mut self.buf)?;

        let deadline = self.deadline();
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush_until(deadline)
    }

    /// Encode an envelope and send it as one message.
    pub fn send_envelope(&mut self, command: Command, body: &[u8]) -> Result<()> {
        let wire = envelope::encode(command, body)?;
        self.send(&wire)
    }

    /// Send a prepared envelope.
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.send_envelope(envelope.command, &envelope.body)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        let deadline = self.deadline();
        self.flush_until(deadline)
    }

    fn flush_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.config
            .write_timeout
            .map(|timeout| Instant::now() + timeout)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn backoff(deadline: Option<Instant>) -> Result<()> {
    if deadline.is_some_and(|at| Instant::now() >= at) {
        return Err(FrameError::Io(std::io::Error::new(
            ErrorKind::TimedOut,
            "stream stayed blocked past the write timeout",
        )));
    }
    thread::sleep(WOULD_BLOCK_BACKOFF);
    Ok(())
}

impl MessageWriter<Connection> {
    /// Create a message writer for a `Connection` and apply the write timeout
    /// from config.
    pub fn with_config_tcp(inner: Connection, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_message;

    fn written(writer: MessageWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn write_single_message() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"hello").unwrap();

        let mut wire = written(writer);
        let message = decode_message(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(message.as_ref(), b"hello");
    }

    #[test]
    fn write_envelope_message() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send_envelope(Command::Deliver, b"mo").unwrap();
        writer
            .write_envelope(&Envelope::empty(Command::Empty))
            .unwrap();

        let mut wire = written(writer);
        let first = decode_message(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_message(&mut wire, usize::MAX).unwrap().unwrap();

        let first = Envelope::decode(&first).unwrap();
        assert_eq!(first.command, Command::Deliver);
        assert_eq!(first.body.as_ref(), b"mo");
        assert_eq!(Envelope::decode(&second).unwrap().command, Command::Empty);
    }

    #[test]
    fn message_too_large_rejected() {
        let cfg = FrameConfig {
            max_message_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = MessageWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { .. }));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = MessageWriter::new(sink);

        writer.send(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_and_would_block_writes() {
        let sink = FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        };

        let mut writer = MessageWriter::new(sink);
        writer.send(b"retry").unwrap();

        let mut wire = BytesMut::from(writer.into_inner().data.as_slice());
        let message = decode_message(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(message.as_ref(), b"retry");
    }

    #[test]
    fn blocked_stream_times_out() {
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(20)),
            ..FrameConfig::default()
        };
        let mut writer = MessageWriter::with_config(BlockedWriter, cfg);

        let started = std::time::Instant::now();
        let err = writer.send(b"never drained").unwrap_err();

        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == ErrorKind::TimedOut));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = MessageWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn applies_write_timeout_for_tcp_connection() {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
        let endpoint = lamb_transport::TcpEndpoint::bind(addr).unwrap();
        let client = lamb_transport::connect(
            endpoint.local_addr(),
            std::time::Duration::from_secs(1),
        )
        .unwrap();

        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        assert!(MessageWriter::with_config_tcp(client, cfg).is_ok());
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A peer that never drains its receive buffer.
    struct BlockedWriter;

    impl Write for BlockedWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Fails each write with the next queued error kind, then succeeds.
    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.failures.is_empty() {
                return Err(std::io::Error::from(self.failures.remove(0)));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
