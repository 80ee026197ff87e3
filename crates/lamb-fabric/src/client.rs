//! Client side of the rendezvous.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use lamb_frame::{
    Command, Envelope, FrameConfig, FrameError, MessageReader, MessageWriter, HEADER_SIZE,
};
use lamb_transport::Connection;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{FabricError, Result};
use crate::hello::{HelloRequest, HelloResponse};
use crate::queue::QueueItem;

/// Send one hello to the control endpoint and wait for the reply.
///
/// An `Empty` reply means the broker could not prepare a session in time
/// and maps to `AllocationTimeout`. A hello the broker discards gets no
/// reply at all, which surfaces as `Timeout`.
pub fn hello(
    control: SocketAddr,
    request: &HelloRequest,
    timeout: Duration,
) -> Result<HelloResponse> {
    let (mut reader, mut writer) = open(control, timeout)?;
    writer.send(&request.to_envelope()?)?;

    let envelope = read_reply(&mut reader, timeout)?;
    match envelope.command {
        Command::Response => HelloResponse::from_envelope(&envelope),
        Command::Empty => Err(FabricError::AllocationTimeout),
        other => Err(FabricError::Protocol(format!(
            "unexpected {other} reply to hello"
        ))),
    }
}

/// Zero-pad `body` to the record body size for `record_size`.
pub fn pad_record(body: &[u8], record_size: usize) -> Result<Vec<u8>> {
    let expected = record_size.saturating_sub(HEADER_SIZE);
    if body.len() > expected {
        return Err(FabricError::RecordSize {
            expected,
            actual: body.len(),
        });
    }
    let mut padded = body.to_vec();
    padded.resize(expected, 0);
    Ok(padded)
}

/// A connected session: hello done, peer attached to the session endpoint.
pub struct SessionClient {
    response: HelloResponse,
    reader: MessageReader<Connection>,
    writer: MessageWriter<Connection>,
    config: ClientConfig,
}

impl SessionClient {
    /// Say hello on `control`, then connect to the allocated session port.
    pub fn connect(
        control: SocketAddr,
        request: &HelloRequest,
        config: ClientConfig,
    ) -> Result<Self> {
        let response = hello(control, request, config.timeout)?;
        let addr = session_addr(control, &response);
        let (reader, writer) = open(addr, config.timeout)?;
        debug!(%addr, client_id = response.id, "session connected");
        Ok(Self {
            response,
            reader,
            writer,
            config,
        })
    }

    /// The broker's hello reply.
    pub fn hello_response(&self) -> &HelloResponse {
        &self.response
    }

    /// Push one record. `body` must be exactly `record_size - HEADER_SIZE`
    /// bytes; see [`pad_record`].
    pub fn push(&mut self, command: Command, body: &[u8]) -> Result<()> {
        if !command.is_record() {
            return Err(FabricError::Protocol(format!(
                "{command} is not a record command"
            )));
        }
        let expected = self.config.record_size.saturating_sub(HEADER_SIZE);
        if body.len() != expected {
            return Err(FabricError::RecordSize {
                expected,
                actual: body.len(),
            });
        }
        self.writer.send_envelope(command, body)?;
        Ok(())
    }

    /// Pull the next queued record. `None` means the queue was empty.
    pub fn request(&mut self) -> Result<Option<QueueItem>> {
        self.writer.send(b"req")?;
        let envelope = read_reply(&mut self.reader, self.config.timeout)?;
        match envelope.command {
            Command::Empty => Ok(None),
            command if command.is_record() => Ok(Some(QueueItem::from(envelope))),
            other => Err(FabricError::Protocol(format!(
                "unexpected {other} reply to req"
            ))),
        }
    }

    /// End the session.
    pub fn bye(mut self) -> Result<()> {
        self.writer.send(b"bye")?;
        Ok(())
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("response", &self.response)
            .field("config", &self.config)
            .finish()
    }
}

fn open(
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(MessageReader<Connection>, MessageWriter<Connection>)> {
    let conn = lamb_transport::connect(addr, timeout)?;
    let writer_conn = conn.try_clone()?;
    let frame_config = FrameConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        ..FrameConfig::default()
    };
    Ok((
        MessageReader::with_config_tcp(conn, frame_config.clone())?,
        MessageWriter::with_config_tcp(writer_conn, frame_config)?,
    ))
}

fn read_reply(reader: &mut MessageReader<Connection>, timeout: Duration) -> Result<Envelope> {
    match reader.read_envelope() {
        Ok(envelope) => Ok(envelope),
        Err(FrameError::Io(err))
            if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            Err(FabricError::Timeout(timeout))
        }
        Err(FrameError::ConnectionClosed) => Err(FabricError::Disconnected(
            "connection closed before reply".to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}

/// Where to reach the session: the advertised address, unless it is
/// unparseable or unspecified, in which case the control host is used.
fn session_addr(control: SocketAddr, response: &HelloResponse) -> SocketAddr {
    let ip = response
        .addr
        .parse::<IpAddr>()
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(control.ip());
    SocketAddr::new(ip, response.port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_record_fills_with_zeros() {
        let padded = pad_record(b"hello", 16).expect("body should fit");
        assert_eq!(padded.len(), 16 - HEADER_SIZE);
        assert_eq!(&padded[..5], b"hello");
        assert!(padded[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn pad_record_rejects_oversized_body() {
        let err = pad_record(&[1; 600], 512).unwrap_err();
        assert!(matches!(
            err,
            FabricError::RecordSize {
                expected: 504,
                actual: 600
            }
        ));
    }

    #[test]
    fn session_addr_falls_back_to_control_host() {
        let control: SocketAddr = "127.0.0.1:30000".parse().unwrap();
        let wildcard = HelloResponse {
            id: 1,
            addr: "0.0.0.0".to_string(),
            port: 30001,
        };
        assert_eq!(
            session_addr(control, &wildcard),
            "127.0.0.1:30001".parse::<SocketAddr>().unwrap()
        );

        let advertised = HelloResponse {
            addr: "10.0.0.8".to_string(),
            ..wildcard
        };
        assert_eq!(
            session_addr(control, &advertised),
            "10.0.0.8:30001".parse::<SocketAddr>().unwrap()
        );
    }
}
