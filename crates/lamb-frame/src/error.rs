/// Errors that can occur during message and envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is shorter than the envelope header.
    #[error("frame too short ({len} bytes, header is {header})")]
    FrameTooShort { len: usize, header: usize },

    /// The command code is outside the known set.
    #[error("unknown command code {0:#010x}")]
    UnknownCommand(u32),

    /// The header length field disagrees with the buffer length.
    #[error("envelope length mismatch (header says {declared}, buffer has {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
