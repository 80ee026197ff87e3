//! Rendezvous broker.
//!
//! Listens on the well-known control endpoint. Every valid hello gets a
//! freshly allocated session endpoint: the broker spawns a worker, waits
//! for its port, replies with the port and only then dispatches the
//! session to the client type's lane.
//!
//! Each control connection is served on its own thread, so a quiet or slow
//! client never holds up another client's hello.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use lamb_frame::{Command, Envelope, FrameError, MessageReader, MessageWriter};
use lamb_transport::{Connection, TcpEndpoint};
use tracing::{debug, error, info, warn};

use crate::error::{FabricError, Result};
use crate::fabric::Fabric;
use crate::hello::{HelloRequest, HelloResponse};
use crate::router::SessionTicket;
use crate::session::{spawn_session, Assignment, PendingSession};
use crate::telemetry::Counter;

/// Result of handling one control message.
#[derive(Debug)]
pub(crate) enum HelloOutcome {
    /// No reply.
    Discard,
    /// Reply and do nothing else.
    Reply(Bytes),
    /// Reply, then dispatch the pending session.
    Accept {
        reply: Bytes,
        request: HelloRequest,
        port: u16,
        session: PendingSession,
    },
}

/// The control endpoint and its accept loop.
pub struct Broker {
    fabric: Arc<Fabric>,
    endpoint: TcpEndpoint,
}

impl Broker {
    /// Bind the control endpoint from the fabric's broker config.
    pub fn bind(fabric: Arc<Fabric>) -> Result<Self> {
        let config = &fabric.config().broker;
        let endpoint = TcpEndpoint::bind(SocketAddr::new(config.listen, config.port))?;
        Ok(Self { fabric, endpoint })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    /// Run the accept loop on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let broker = Arc::new(self);
        let name = "lamb-broker".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || broker.run())
            .map_err(|source| FabricError::Spawn { name, source })
    }

    /// Accept control connections until the fabric shuts down.
    ///
    /// Every connection gets its own thread and carries strict
    /// request-then-reply exchanges.
    pub fn run(self: &Arc<Self>) {
        info!(addr = %self.local_addr(), "broker listening");
        let accept_poll = self.fabric.config().broker.accept_poll;

        while !self.fabric.is_shutdown() {
            match self.endpoint.try_accept() {
                Ok(Some(conn)) => {
                    if let Err(err) = self.spawn_connection(conn) {
                        error!(error = %err, "could not start control connection thread");
                    }
                }
                Ok(None) => {
                    if !self.fabric.pacer().pause(accept_poll) {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "control accept failed");
                    if !self.fabric.pacer().pause(accept_poll) {
                        break;
                    }
                }
            }
        }

        info!(addr = %self.local_addr(), "broker stopped");
    }

    fn spawn_connection(self: &Arc<Self>, conn: Connection) -> Result<()> {
        let peer = conn.peer_addr();
        let broker = Arc::clone(self);
        let name = format!("lamb-control-{}", peer.port());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Err(err) = broker.serve_connection(conn) {
                    warn!(%peer, error = %err, "control connection failed");
                }
            })
            .map(|_| ())
            .map_err(|source| FabricError::Spawn { name, source })
    }

    /// Serve one control connection until it closes, goes quiet for the
    /// receive timeout, or the fabric shuts down.
    pub fn serve_connection(&self, conn: Connection) -> Result<()> {
        let frame_config = self.fabric.config().broker.control_frame_config();
        let peer = conn.peer_addr();
        let writer_conn = conn.try_clone()?;
        let mut reader = MessageReader::with_config_tcp(conn, frame_config.clone())?;
        let mut writer = MessageWriter::with_config_tcp(writer_conn, frame_config)?;

        while !self.fabric.is_shutdown() {
            let message = match reader.read_message() {
                Ok(message) => message,
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    debug!(%peer, "control connection idle, re-arming");
                    return Ok(());
                }
                Err(FrameError::ConnectionClosed) => {
                    debug!(%peer, "control connection closed");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            match self.handle_request(&message) {
                HelloOutcome::Discard => {}
                HelloOutcome::Reply(reply) => writer.send(&reply)?,
                HelloOutcome::Accept {
                    reply,
                    request,
                    port,
                    session,
                } => {
                    if let Err(err) = writer.send(&reply) {
                        session.abandon();
                        return Err(err.into());
                    }
                    self.dispatch(&request, port, session);
                }
            }
        }
        Ok(())
    }

    /// Validate a hello, allocate its session and build the reply.
    pub(crate) fn handle_request(&self, message: &[u8]) -> HelloOutcome {
        let counters = self.fabric.counters();
        let config = &self.fabric.config().broker;

        let envelope = match Envelope::decode(message) {
            Ok(envelope) => envelope,
            Err(err) => {
                counters.incr(Counter::Malformed);
                warn!(len = message.len(), error = %err, "discarding malformed control message");
                return HelloOutcome::Discard;
            }
        };
        if envelope.command != Command::Request {
            counters.incr(Counter::Malformed);
            warn!(command = %envelope.command, "discarding non-request control message");
            return HelloOutcome::Discard;
        }
        let request = match HelloRequest::from_envelope(&envelope) {
            Ok(request) => request,
            Err(err) => {
                counters.incr(Counter::Malformed);
                warn!(error = %err, "discarding unreadable hello");
                return HelloOutcome::Discard;
            }
        };
        if let Err(err) = request.validate() {
            counters.incr(Counter::HellosRejected);
            warn!(client_id = request.id, error = %err, "rejecting hello");
            return HelloOutcome::Discard;
        }

        let start = self.port().saturating_add(1);
        let session = match spawn_session(Arc::clone(&self.fabric), &request, start) {
            Ok(session) => session,
            Err(err) => {
                counters.incr(Counter::AllocationFailures);
                error!(client_id = request.id, error = %err, "could not start session worker");
                return HelloOutcome::Discard;
            }
        };

        let port = match session.wait_port(config.allocation_timeout) {
            Ok(port) => port,
            Err(FabricError::AllocationTimeout) => {
                counters.incr(Counter::AllocationTimeouts);
                error!(
                    client_id = request.id,
                    timeout = ?config.allocation_timeout,
                    "session allocation timed out"
                );
                session.abandon();
                return match Envelope::empty(Command::Empty).encode() {
                    Ok(reply) => HelloOutcome::Reply(reply),
                    Err(_) => HelloOutcome::Discard,
                };
            }
            Err(err) => {
                counters.incr(Counter::AllocationFailures);
                error!(client_id = request.id, error = %err, "session allocation failed");
                return HelloOutcome::Discard;
            }
        };

        let response = HelloResponse {
            id: request.id,
            addr: config.advertised_addr(),
            port,
        };
        let reply = match response.to_envelope() {
            Ok(reply) => reply,
            Err(err) => {
                error!(client_id = request.id, error = %err, "could not encode hello response");
                session.abandon();
                return HelloOutcome::Discard;
            }
        };

        counters.incr(Counter::HellosAccepted);
        info!(
            client_id = request.id,
            client_type = request.client_type,
            port,
            session = %session.id(),
            "hello accepted"
        );
        HelloOutcome::Accept {
            reply,
            request,
            port,
            session,
        }
    }

    fn dispatch(&self, request: &HelloRequest, port: u16, session: PendingSession) {
        let router = self.fabric.router();
        match router.route(request.client_type) {
            Ok(lane) => {
                let queue = router.dispatch(SessionTicket {
                    session: session.id(),
                    client_id: request.id,
                    client_type: lane.client_type(),
                    port,
                });
                debug!(session = %session.id(), queue = queue.name(), "session dispatched");
                session.assign(Assignment::Bridge(queue));
            }
            Err(err) => {
                self.fabric.counters().incr(Counter::UnknownClientTypes);
                error!(
                    client_id = request.id,
                    client_type = request.client_type,
                    error = %err,
                    "no lane for client type, closing session"
                );
                session.assign(Assignment::Close);
            }
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::*;
    use crate::config::{BrokerConfig, FabricConfig};
    use crate::hello::ClientType;
    use crate::pacer::InstantPacer;

    fn broker() -> Broker {
        let config = FabricConfig {
            broker: BrokerConfig {
                listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
                ..BrokerConfig::default()
            },
            ..FabricConfig::default()
        };
        let fabric = Arc::new(Fabric::with_pacer(config, Arc::new(InstantPacer::new())));
        Broker::bind(fabric).expect("control endpoint should bind")
    }

    #[test]
    fn malformed_message_discarded() {
        let broker = broker();
        assert!(matches!(
            broker.handle_request(b"hi"),
            HelloOutcome::Discard
        ));
        assert_eq!(broker.fabric().counters().get(Counter::Malformed), 1);
    }

    #[test]
    fn non_request_command_discarded() {
        let broker = broker();
        let wire = Envelope::empty(Command::Req).encode().unwrap();
        assert!(matches!(
            broker.handle_request(&wire),
            HelloOutcome::Discard
        ));
    }

    #[test]
    fn invalid_identity_discarded_without_allocation() {
        let broker = broker();
        let wire = HelloRequest::new(0, ClientType::Mt).to_envelope().unwrap();
        assert!(matches!(
            broker.handle_request(&wire),
            HelloOutcome::Discard
        ));
        assert_eq!(broker.fabric().counters().get(Counter::HellosRejected), 1);
        assert!(broker.fabric().registry().is_empty());
    }

    #[test]
    fn valid_hello_allocates_above_control_port() {
        let broker = broker();
        let wire = HelloRequest::new(42, ClientType::Mt).to_envelope().unwrap();

        match broker.handle_request(&wire) {
            HelloOutcome::Accept {
                reply,
                request,
                port,
                session,
            } => {
                assert!(port > broker.port());
                assert_eq!(request.id, 42);
                let envelope = Envelope::decode(&reply).unwrap();
                let response = HelloResponse::from_envelope(&envelope).unwrap();
                assert_eq!(response.id, 42);
                assert_eq!(response.port, port);
                assert_eq!(response.addr, "127.0.0.1");
                session
                    .assign(Assignment::Close)
                    .join()
                    .expect("worker should exit");
            }
            other => panic!("expected accepted hello, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_dispatch_closes_without_ticket() {
        let broker = broker();
        let wire = Envelope::new(Command::Request, &br#"{"id":5,"type":42}"#[..])
            .encode()
            .unwrap();

        let HelloOutcome::Accept {
            request,
            port,
            session,
            ..
        } = broker.handle_request(&wire)
        else {
            panic!("unknown type should still be accepted");
        };
        let id = session.id();
        broker.dispatch(&request, port, session);

        for lane in broker.fabric().router().lanes() {
            assert!(lane.sessions.is_empty());
        }
        assert_eq!(
            broker.fabric().counters().get(Counter::UnknownClientTypes),
            1
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while broker.fabric().registry().get(id).is_some() {
            assert!(std::time::Instant::now() < deadline, "worker should close");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
