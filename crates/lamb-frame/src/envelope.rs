use bytes::{BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::{FrameError, Result};

/// Envelope header: total length (4) + command code (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// A command code with its opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// What the body holds.
    pub command: Command,
    /// Opaque body; only meaningful once `command` has been checked.
    pub body: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(command: Command, body: impl Into<Bytes>) -> Self {
        Self {
            command,
            body: body.into(),
        }
    }

    /// An envelope with no body.
    pub fn empty(command: Command) -> Self {
        Self::new(command, Bytes::new())
    }

    /// The total wire size of this envelope (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Encode this envelope.
    pub fn encode(&self) -> Result<Bytes> {
        encode(self.command, &self.body)
    }

    /// Decode a complete envelope buffer.
    pub fn decode(src: &[u8]) -> Result<Self> {
        decode(src)
    }
}

/// Encode `command` and `body` into a standalone envelope buffer.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Length (4B)  │ Command (4B) │ Body            │
/// │ BE, incl hdr │ BE           │ (Length - 8 B)  │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode(command: Command, body: &[u8]) -> Result<Bytes> {
    let total = HEADER_SIZE + body.len();
    if total > u32::MAX as usize {
        return Err(FrameError::MessageTooLarge {
            size: total,
            max: u32::MAX as usize,
        });
    }
    let mut dst = BytesMut::with_capacity(total);
    dst.put_u32(total as u32);
    dst.put_u32(command.code());
    dst.put_slice(body);
    Ok(dst.freeze())
}

/// Decode a complete envelope buffer.
///
/// Fails without looking at the body when the buffer is shorter than the
/// header, the length field disagrees with the buffer, or the command is
/// unknown.
pub fn decode(src: &[u8]) -> Result<Envelope> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::FrameTooShort {
            len: src.len(),
            header: HEADER_SIZE,
        });
    }

    let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if declared != src.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: src.len(),
        });
    }

    let command = Command::try_from(u32::from_be_bytes([src[4], src[5], src[6], src[7]]))?;

    Ok(Envelope {
        command,
        body: Bytes::copy_from_slice(&src[HEADER_SIZE..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let wire = encode(Command::Submit, b"13800138000 hello").unwrap();
        assert_eq!(wire.len(), HEADER_SIZE + 17);

        let envelope = decode(&wire).unwrap();
        assert_eq!(envelope.command, Command::Submit);
        assert_eq!(envelope.body.as_ref(), b"13800138000 hello");
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let wire = encode(Command::Req, b"").unwrap();
        assert_eq!(wire.as_ref(), &[0, 0, 0, 8, 0, 0, 0, 6]);
    }

    #[test]
    fn test_decode_too_short() {
        let result = decode(&[0, 0, 0, 8, 0, 0]);
        assert!(matches!(
            result,
            Err(FrameError::FrameTooShort { len: 6, header: 8 })
        ));
    }

    #[test]
    fn test_decode_unknown_command() {
        let result = decode(&[0, 0, 0, 8, 0, 0, 0, 42]);
        assert!(matches!(result, Err(FrameError::UnknownCommand(42))));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut wire = encode(Command::Deliver, b"abc").unwrap().to_vec();
        wire.push(0);
        let result = decode(&wire);
        assert!(matches!(
            result,
            Err(FrameError::LengthMismatch {
                declared: 11,
                actual: 12
            })
        ));
    }

    #[test]
    fn test_empty_body() {
        let envelope = Envelope::empty(Command::Empty);
        let wire = envelope.encode().unwrap();
        assert_eq!(wire.len(), HEADER_SIZE);
        assert_eq!(decode(&wire).unwrap(), envelope);
    }

    #[test]
    fn test_wire_size() {
        let envelope = Envelope::new(Command::Submit, Bytes::from_static(b"test"));
        assert_eq!(envelope.wire_size(), HEADER_SIZE + 4);
    }
}
