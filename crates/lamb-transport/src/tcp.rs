use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// A bound TCP listener.
///
/// Used both for the broker's control endpoint and for every session
/// endpoint. The socket is closed when the value is dropped.
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind and listen on `addr`.
    ///
    /// Port `0` asks the OS for an ephemeral port; [`TcpEndpoint::port`]
    /// reports the one actually bound.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening on tcp endpoint");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking unless the endpoint is
    /// non-blocking).
    pub fn accept(&self) -> Result<Connection> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, local = %self.local_addr, "accepted connection");
        Ok(Connection::from_stream(stream, peer))
    }

    /// Accept without blocking.
    ///
    /// Returns `Ok(None)` when no connection is pending. The endpoint is
    /// switched to non-blocking mode on first use.
    pub fn try_accept(&self) -> Result<Option<Connection>> {
        self.listener.set_nonblocking(true)?;
        match self.listener.accept() {
            Ok((stream, peer)) => {
                // Accepted sockets may inherit O_NONBLOCK on some platforms.
                stream.set_nonblocking(false)?;
                debug!(%peer, local = %self.local_addr, "accepted connection");
                Ok(Some(Connection::from_stream(stream, peer)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl std::fmt::Debug for TcpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpEndpoint")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        debug!(local = %self.local_addr, "closing tcp endpoint");
    }
}

/// Connect to a listening endpoint with a connect timeout.
pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Connection> {
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|source| TransportError::Connect { addr, source })?;
    stream.set_nodelay(true)?;
    debug!(%addr, "connected to tcp endpoint");
    Ok(Connection::from_stream(stream, addr))
}

/// A connected TCP stream. Implements `Read + Write`.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub(crate) fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    /// Address of the remote side.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Switch between blocking and non-blocking reads and writes.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.stream.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.stream.try_clone()?;
        Ok(Self::from_stream(cloned, self.peer))
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn test_bind_accept_connect() {
        let endpoint = TcpEndpoint::bind(loopback(0)).unwrap();
        let addr = endpoint.local_addr();
        assert_ne!(addr.port(), 0);

        let handle = std::thread::spawn(move || {
            let mut client = connect(addr, Duration::from_secs(1)).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = endpoint.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_try_accept_without_pending_connection() {
        let endpoint = TcpEndpoint::bind(loopback(0)).unwrap();
        assert!(endpoint.try_accept().unwrap().is_none());
    }

    #[test]
    fn test_try_accept_returns_blocking_connection() {
        let endpoint = TcpEndpoint::bind(loopback(0)).unwrap();
        let mut client = connect(endpoint.local_addr(), Duration::from_secs(1)).unwrap();
        client.write_all(b"ok").unwrap();

        let mut accepted = None;
        for _ in 0..200 {
            if let Some(conn) = endpoint.try_accept().unwrap() {
                accepted = Some(conn);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let mut server = accepted.expect("pending connection should be accepted");
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn test_bind_in_use_port_fails() {
        let first = TcpEndpoint::bind(loopback(0)).unwrap();
        let result = TcpEndpoint::bind(first.local_addr());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let endpoint = TcpEndpoint::bind(loopback(0)).unwrap();
            endpoint.local_addr()
        };
        let result = connect(addr, Duration::from_millis(200));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_drop_releases_port() {
        let endpoint = TcpEndpoint::bind(loopback(0)).unwrap();
        let addr = endpoint.local_addr();
        drop(endpoint);
        let rebound = TcpEndpoint::bind(addr).expect("dropped endpoint should free its port");
        assert_eq!(rebound.port(), addr.port());
    }
}
