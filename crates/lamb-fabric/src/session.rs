//! Session workers.
//!
//! One thread per accepted hello. The worker binds its own session
//! endpoint, reports the port to the broker, waits for the broker's
//! assignment and then bridges its single peer to a lane's message queue:
//!
//! ```text
//! Allocating ──port report──▶ (assignment) ──Bridge──▶ Active ──bye──▶ Draining ──▶ Closed
//!      │                            │                    │
//!      └── allocation error         └── Close / none     └── dead peer / shutdown
//! ```

use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lamb_frame::{Command, Envelope, FrameConfig, FrameError, MessageReader, MessageWriter};
use lamb_transport::{Connection, TcpEndpoint};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{FabricError, Result};
use crate::fabric::Fabric;
use crate::hello::HelloRequest;
use crate::queue::{QueueItem, WorkQueue};
use crate::registry::{SessionGuard, SessionId, SessionState};
use crate::telemetry::{Counter, FabricCounters};

/// What the broker decided after replying to the hello.
#[derive(Debug)]
pub enum Assignment {
    /// Exchange records with this queue.
    Bridge(Arc<WorkQueue<QueueItem>>),
    /// Close the endpoint without serving it.
    Close,
}

/// Why a session worker exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No free port could be bound.
    AllocationFailed,
    /// The broker stopped waiting before the session was assigned.
    Abandoned,
    /// The broker routed the hello nowhere.
    ClosedByBroker,
    /// The peer said `bye`.
    Bye,
    /// No peer connection across too many polls.
    DeadPeer,
    /// The fabric is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::AllocationFailed => "allocation_failed",
            CloseReason::Abandoned => "abandoned",
            CloseReason::ClosedByBroker => "closed_by_broker",
            CloseReason::Bye => "bye",
            CloseReason::DeadPeer => "dead_peer",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-side handle to a worker that has not been assigned yet.
#[derive(Debug)]
pub struct PendingSession {
    id: SessionId,
    ports: Receiver<Result<u16>>,
    assignments: SyncSender<Assignment>,
    thread: JoinHandle<CloseReason>,
}

impl PendingSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Wait for the worker's port report.
    ///
    /// Returns `AllocationTimeout` when nothing arrives within `timeout`,
    /// and the worker's own error when allocation failed.
    pub fn wait_port(&self, timeout: Duration) -> Result<u16> {
        match self.ports.recv_timeout(timeout) {
            Ok(report) => report,
            Err(RecvTimeoutError::Timeout) => Err(FabricError::AllocationTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(FabricError::Disconnected(format!(
                "{} exited before reporting a port",
                self.id
            ))),
        }
    }

    /// Hand the worker its assignment. The returned handle may be dropped
    /// to detach the worker.
    pub fn assign(self, assignment: Assignment) -> JoinHandle<CloseReason> {
        if self.assignments.send(assignment).is_err() {
            debug!(session = %self.id, "worker gone before assignment");
        }
        self.thread
    }

    /// Give up on the worker; it closes its endpoint on its own.
    pub fn abandon(self) -> JoinHandle<CloseReason> {
        self.thread
    }
}

/// Start a worker for `request` that allocates from `start` upwards.
pub fn spawn_session(
    fabric: Arc<Fabric>,
    request: &HelloRequest,
    start: u16,
) -> Result<PendingSession> {
    let guard = fabric.registry().open(request.id, request.client_type);
    let id = guard.id();
    let (port_tx, ports) = mpsc::sync_channel(1);
    let (assignments, assignment_rx) = mpsc::sync_channel(1);

    let name = format!("lamb-{id}");
    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || run_worker(fabric, guard, start, port_tx, assignment_rx))
        .map_err(|source| FabricError::Spawn { name, source })?;

    Ok(PendingSession {
        id,
        ports,
        assignments,
        thread,
    })
}

fn run_worker(
    fabric: Arc<Fabric>,
    guard: SessionGuard,
    start: u16,
    ports: SyncSender<Result<u16>>,
    assignments: Receiver<Assignment>,
) -> CloseReason {
    let session = guard.id();
    let config = fabric.config().session.clone();

    let (endpoint, port) = match fabric.allocator().allocate(start) {
        Ok(bound) => bound,
        Err(err) => {
            error!(%session, start, error = %err, "session port allocation failed");
            let _ = ports.send(Err(err.into()));
            return CloseReason::AllocationFailed;
        }
    };
    guard.set_port(port);

    if ports.send(Ok(port)).is_err() {
        warn!(%session, port, "broker stopped waiting for the port report, closing endpoint");
        return CloseReason::Abandoned;
    }

    let queue = match assignments.recv_timeout(config.assignment_timeout) {
        Ok(Assignment::Bridge(queue)) => queue,
        Ok(Assignment::Close) => {
            info!(%session, port, "broker closed the session endpoint");
            return CloseReason::ClosedByBroker;
        }
        Err(_) => {
            warn!(%session, port, "no assignment from broker, closing endpoint");
            return CloseReason::Abandoned;
        }
    };

    guard.set_state(SessionState::Active);
    fabric.counters().incr(Counter::SessionsOpened);
    info!(%session, port, queue = queue.name(), "session active");

    let mut worker = Worker {
        fabric: Arc::clone(&fabric),
        session,
        endpoint,
        queue,
        peer: None,
        empty_polls: 0,
        config,
    };
    let reason = worker.run(&guard);

    guard.set_state(SessionState::Closed);
    fabric.counters().incr(Counter::SessionsClosed);
    info!(%session, port, %reason, "session closed");
    reason
}

struct Peer {
    reader: MessageReader<Connection>,
    writer: MessageWriter<Connection>,
}

impl Peer {
    fn attach(conn: Connection, config: &SessionConfig) -> Result<Self> {
        conn.set_nonblocking(true)?;
        let writer_conn = conn.try_clone()?;
        let frame_config = FrameConfig {
            max_message_size: config.max_message,
            read_timeout: None,
            write_timeout: Some(config.write_timeout),
        };
        Ok(Self {
            reader: MessageReader::with_config(conn, frame_config.clone()),
            writer: MessageWriter::with_config(writer_conn, frame_config),
        })
    }
}

enum Step {
    /// A message was handled; poll again right away.
    Continue,
    /// Nothing usable arrived.
    Idle,
    Close(CloseReason),
}

struct Worker {
    fabric: Arc<Fabric>,
    session: SessionId,
    endpoint: TcpEndpoint,
    queue: Arc<WorkQueue<QueueItem>>,
    peer: Option<Peer>,
    empty_polls: u32,
    config: SessionConfig,
}

impl Worker {
    fn run(&mut self, guard: &SessionGuard) -> CloseReason {
        loop {
            if self.fabric.is_shutdown() {
                return CloseReason::Shutdown;
            }
            if self.peer.is_none() {
                self.try_attach();
            }

            let step = match self.poll() {
                Some(message) => self.handle(&message),
                None => Step::Idle,
            };

            match step {
                Step::Continue => {}
                Step::Idle => {
                    if let Some(reason) = self.idle() {
                        return reason;
                    }
                }
                Step::Close(reason) => {
                    guard.set_state(SessionState::Draining);
                    return reason;
                }
            }
        }
    }

    fn try_attach(&mut self) {
        match self.endpoint.try_accept() {
            Ok(Some(conn)) => {
                let peer_addr = conn.peer_addr();
                match Peer::attach(conn, &self.config) {
                    Ok(peer) => {
                        info!(session = %self.session, peer = %peer_addr, "peer attached");
                        self.peer = Some(peer);
                        self.empty_polls = 0;
                    }
                    Err(err) => {
                        warn!(session = %self.session, error = %err, "failed to attach peer");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(session = %self.session, error = %err, "session accept failed"),
        }
    }

    fn poll(&mut self) -> Option<bytes::Bytes> {
        let peer = self.peer.as_mut()?;
        match peer.reader.poll_message() {
            Ok(message) => message,
            Err(FrameError::ConnectionClosed) => {
                debug!(
                    session = %self.session,
                    unread = peer.reader.buffered(),
                    "peer disconnected"
                );
                self.peer = None;
                None
            }
            Err(err) => {
                warn!(session = %self.session, error = %err, "dropping peer after receive error");
                self.peer = None;
                None
            }
        }
    }

    fn handle(&mut self, message: &[u8]) -> Step {
        if has_token(message, b"bye") {
            info!(session = %self.session, "peer said bye");
            return Step::Close(CloseReason::Bye);
        }
        if has_token(message, b"req") {
            self.serve_pull();
            return Step::Continue;
        }

        match Envelope::decode(message) {
            Ok(envelope) if envelope.command == Command::Req => {
                self.serve_pull();
                Step::Continue
            }
            Ok(envelope)
                if envelope.command.is_record()
                    && envelope.wire_size() == self.config.record_size =>
            {
                let kind = envelope.command;
                self.queue.push(QueueItem::from(envelope));
                if let Some(counter) = Counter::pushed(kind) {
                    self.fabric.counters().incr(counter);
                }
                debug!(
                    session = %self.session,
                    queue = self.queue.name(),
                    command = %kind,
                    "record queued"
                );
                Step::Continue
            }
            Ok(envelope) => {
                self.fabric.counters().incr(Counter::Malformed);
                debug!(
                    session = %self.session,
                    command = %envelope.command,
                    len = message.len(),
                    "ignoring unexpected message"
                );
                Step::Idle
            }
            Err(err) => {
                self.fabric.counters().incr(Counter::Malformed);
                debug!(
                    session = %self.session,
                    len = message.len(),
                    error = %err,
                    "ignoring undecodable message"
                );
                Step::Idle
            }
        }
    }

    fn serve_pull(&mut self) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        if let Err(err) = reply_to_pull(&self.queue, &mut peer.writer, self.fabric.counters()) {
            warn!(session = %self.session, error = %err, "pull reply failed, dropping peer");
            self.peer = None;
        }
    }

    /// Returns the close reason when the session must stop.
    fn idle(&mut self) -> Option<CloseReason> {
        let wait = if self.peer.is_some() {
            self.empty_polls = 0;
            self.config.poll_interval
        } else {
            self.empty_polls += 1;
            if self.empty_polls > self.config.idle_limit {
                self.fabric.counters().incr(Counter::DeadPeers);
                warn!(
                    session = %self.session,
                    polls = self.empty_polls,
                    "no peer connection, closing dead session"
                );
                return Some(CloseReason::DeadPeer);
            }
            self.config.dead_peer_backoff
        };

        if self.fabric.pacer().pause(wait) {
            None
        } else {
            Some(CloseReason::Shutdown)
        }
    }
}

/// Answer a pull: send the head item, or an `Empty` envelope when the
/// queue is empty. An item whose reply could not be sent goes back to the
/// head of the queue.
pub(crate) fn reply_to_pull<W: Write>(
    queue: &WorkQueue<QueueItem>,
    writer: &mut MessageWriter<W>,
    counters: &FabricCounters,
) -> Result<()> {
    let Some(item) = queue.pop() else {
        counters.incr(Counter::EmptyPops);
        writer.write_envelope(&Envelope::empty(Command::Empty))?;
        return Ok(());
    };

    match item.to_wire().and_then(|wire| writer.send(&wire)) {
        Ok(()) => {
            counters.incr(Counter::Popped);
            Ok(())
        }
        Err(err) => {
            queue.restore(item);
            Err(err.into())
        }
    }
}

fn has_token(message: &[u8], token: &[u8]) -> bool {
    message.len() >= token.len() && message[..token.len()].eq_ignore_ascii_case(token)
}
