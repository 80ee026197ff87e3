//! Rendezvous broker and session fabric for the lamb gateway.
//!
//! A client says hello on the well-known control endpoint. The [`Broker`]
//! allocates a dedicated session endpoint, replies with its port, and hands
//! the session to the client type's [`Lane`]. Each session is served by its
//! own worker thread, which moves fixed-size records between the peer and
//! the lane's [`WorkQueue`]; backend loops drain the queues with
//! [`consumer::drain`].
//!
//! All shared state lives in one [`Fabric`], passed explicitly as
//! `Arc<Fabric>`. Every wait goes through its [`Pacer`], so
//! [`Fabric::shutdown`] stops the broker, the workers and the consumers.

pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fabric;
pub mod hello;
pub mod pacer;
pub mod queue;
pub mod registry;
pub mod router;
pub mod session;
pub mod telemetry;

pub use broker::Broker;
pub use client::{hello, pad_record, SessionClient};
pub use config::{
    BrokerConfig, ClientConfig, FabricConfig, SessionConfig, DEFAULT_CONTROL_PORT,
    DEFAULT_RECORD_SIZE,
};
pub use consumer::{drain, spawn_consumer};
pub use error::{FabricError, Result};
pub use fabric::Fabric;
pub use hello::{ClientType, HelloRequest, HelloResponse};
pub use pacer::{InstantPacer, Pacer, SignalPacer};
pub use queue::{QueueItem, WorkQueue};
pub use registry::{SessionGuard, SessionId, SessionRecord, SessionRegistry, SessionState};
pub use router::{DispatchRouter, Lane, SessionTicket};
pub use session::{spawn_session, Assignment, CloseReason, PendingSession};
pub use telemetry::{
    spawn_reporter, Counter, FabricCounters, FabricSnapshot, LaneSnapshot, TelemetrySink,
    TracingSink, DEFAULT_REPORT_INTERVAL,
};
