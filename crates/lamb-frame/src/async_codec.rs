//! `tokio_util::codec` adapter for the message layer.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_message, encode_message, FrameConfig};
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Length-prefixed message codec for `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    /// Create a new codec with the default size limit.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    /// Create a new codec that honours `config.max_message_size`.
    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_message(src, self.max_message_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&[u8]>::encode(self, item.as_ref(), dst)
    }
}

impl Encoder<&[u8]> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size: item.len(),
                max: self.max_message_size,
            });
        }
        encode_message(item, dst)
    }
}

impl Encoder<Envelope> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let wire = item.encode()?;
        Encoder::<&[u8]>::encode(self, wire.as_ref(), dst)
    }
}
