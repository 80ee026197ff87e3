//! Wire format for the lamb fabric.
//!
//! Two layers, both used on every control and session socket:
//! - **messages**: a 4-byte big-endian length prefix gives a TCP stream
//!   discrete message boundaries ([`MessageReader`], [`MessageWriter`])
//! - **envelopes**: inside a message, a fixed 8-byte header (total length +
//!   command code) followed by an opaque body ([`Envelope`])
//!
//! Short control tokens such as `bye` travel as bare messages without an
//! envelope.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod command;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::MessageCodec;
pub use codec::{
    decode_message, encode_message, FrameConfig, DEFAULT_MAX_MESSAGE, LENGTH_PREFIX_SIZE,
};
pub use command::Command;
pub use envelope::{Envelope, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::MessageReader;
pub use writer::MessageWriter;
