//! TCP transport for the lamb rendezvous fabric.
//!
//! Provides the two socket roles every lamb daemon needs:
//! - a bound listener ([`TcpEndpoint`]) for the well-known control endpoint
//!   and for each per-session endpoint
//! - a connected stream ([`Connection`]) that implements `Read + Write`
//!
//! [`PortAllocator`] hands out session endpoints above the control port.

pub mod alloc;
pub mod error;
pub mod tcp;

pub use alloc::{AllocatorConfig, PortAllocator, PortPolicy, DEFAULT_PORT_CEILING};
pub use error::{Result, TransportError};
pub use tcp::{connect, Connection, TcpEndpoint};
