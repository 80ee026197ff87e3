//! Client type to lane dispatch.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::hello::ClientType;
use crate::queue::{QueueItem, WorkQueue};
use crate::registry::SessionId;

/// Announcement that a session is ready for a client type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTicket {
    pub session: SessionId,
    pub client_id: i64,
    pub client_type: ClientType,
    pub port: u16,
}

/// One client type's queues.
#[derive(Debug)]
pub struct Lane {
    client_type: ClientType,
    /// Tickets for sessions opened on this lane, consumed by the backend.
    pub sessions: Arc<WorkQueue<SessionTicket>>,
    /// Records exchanged by this lane's sessions.
    pub messages: Arc<WorkQueue<QueueItem>>,
}

impl Lane {
    /// Create a new lane with empty queues.
    pub fn new(client_type: ClientType) -> Self {
        Self {
            client_type,
            sessions: Arc::new(WorkQueue::new(format!(
                "{}.sessions",
                client_type.name()
            ))),
            messages: Arc::new(WorkQueue::new(client_type.name())),
        }
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn name(&self) -> &'static str {
        self.client_type.name()
    }
}

/// Total mapping from [`ClientType`] to its [`Lane`].
#[derive(Debug)]
pub struct DispatchRouter {
    lanes: [Lane; ClientType::ALL.len()],
}

impl DispatchRouter {
    /// Create one empty lane per client type.
    pub fn new() -> Self {
        Self {
            lanes: ClientType::ALL.map(Lane::new),
        }
    }

    pub fn lane(&self, client_type: ClientType) -> &Lane {
        &self.lanes[client_type.index()]
    }

    /// Resolve a raw client type code from a hello.
    pub fn route(&self, raw: i32) -> Result<&Lane> {
        let client_type = ClientType::try_from(raw)?;
        Ok(self.lane(client_type))
    }

    /// Queue the ticket on its lane and return the lane's message queue.
    pub fn dispatch(&self, ticket: SessionTicket) -> Arc<WorkQueue<QueueItem>> {
        let lane = self.lane(ticket.client_type);
        lane.sessions.push(ticket);
        Arc::clone(&lane.messages)
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }
}

impl Default for DispatchRouter {
    fn default() -> Self {
        Self::new()
    }
}
