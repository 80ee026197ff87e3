//! Rendezvous connection broker and session fabric for the lamb SMS gateway.
//!
//! A client says hello on a well-known control endpoint and is handed a
//! dedicated point-to-point session endpoint. The session worker behind it
//! moves fixed-size records between the client and a per-category work
//! queue that backend loops drain.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints and the session port allocator
//! - [`frame`]: message framing and command envelopes
//! - [`fabric`]: broker, session workers, lanes and work queues (behind the
//!   `fabric` feature)

/// Re-export transport types.
pub mod transport {
    pub use lamb_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lamb_frame::*;
}

/// Re-export fabric types (requires `fabric` feature).
#[cfg(feature = "fabric")]
pub mod fabric {
    pub use lamb_fabric::*;
}
