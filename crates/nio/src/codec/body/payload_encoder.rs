use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

/// Frames outgoing body content the way the message head announced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    framing: Framing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Framing {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    None,
}

impl PayloadEncoder {
    pub fn is_chunked(&self) -> bool {
        matches!(self.framing, Framing::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.framing, Framing::None)
    }

    pub fn is_finish(&self) -> bool {
        match &self.framing {
            Framing::Length(encoder) => encoder.is_finish(),
            Framing::Chunked(encoder) => encoder.is_finish(),
            Framing::None => true,
        }
    }

    /// How many content bytes may still be written, `None` when unbounded.
    pub fn remaining_length(&self) -> Option<u64> {
        match &self.framing {
            Framing::Length(encoder) => Some(encoder.remaining()),
            Framing::Chunked(encoder) if encoder.is_finish() => Some(0),
            Framing::Chunked(_) => None,
            Framing::None => Some(0),
        }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        let framing = match payload_size {
            PayloadSize::Length(n) => Framing::Length(LengthEncoder::new(n)),
            PayloadSize::Chunked => Framing::Chunked(ChunkedEncoder::new()),
            PayloadSize::Empty => Framing::None,
        };
        Self { framing }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.framing {
            Framing::Length(encoder) => encoder.encode(item, dst),
            Framing::Chunked(encoder) => encoder.encode(item, dst),
            Framing::None => match item {
                PayloadItem::Chunk(bytes) if bytes.has_remaining() => {
                    Err(SendError::invalid_body("message must not carry a body"))
                }
                _ => Ok(()),
            },
        }
    }
}
