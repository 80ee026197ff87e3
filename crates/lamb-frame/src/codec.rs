use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Message prefix: payload length as a 4-byte big-endian integer.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum message size: 1 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 1024 * 1024;

/// Encode one message into the stream format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────┐
/// │ Length (4B)  │ Payload         │
/// │ BE           │ (Length bytes)  │
/// └──────────────┴─────────────────┘
/// ```
pub fn encode_message(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<Bytes>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > max_message {
        return Err(FrameError::MessageTooLarge {
            size: len,
            max: max_message,
        });
    }

    if src.len() < LENGTH_PREFIX_SIZE + len {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(len).freeze()))
}

/// Configuration for message readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum message size in bytes. Default: 1 MiB.
    pub max_message_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_message(b"req", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0, 0, 0, 3, b'r', b'e', b'q']);

        let message = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert_eq!(message.as_ref(), b"req");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_prefix() {
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_message(b"hello", &mut buf).unwrap();
        buf.truncate(LENGTH_PREFIX_SIZE + 2);

        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(4096);
        let result = decode_message(&mut buf, 1024);
        assert!(matches!(
            result,
            Err(FrameError::MessageTooLarge {
                size: 4096,
                max: 1024
            })
        ));
    }

    #[test]
    fn test_multiple_messages() {
        let mut buf = BytesMut::new();
        encode_message(b"first", &mut buf).unwrap();
        encode_message(b"second", &mut buf).unwrap();

        let m1 = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        let m2 = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert_eq!(m1.as_ref(), b"first");
        assert_eq!(m2.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_message() {
        let mut buf = BytesMut::new();
        encode_message(b"", &mut buf).unwrap();
        let message = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert!(message.is_empty());
    }
}
