use crate::protocol::{ParseError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Decodes a body delimited by `Content-Length`.
///
/// Never takes more than the remaining length off the source, so bytes of
/// a pipelined message behind the body stay in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub fn is_finish(&self) -> bool {
        self.remaining == 0
    }

    /// Hands out at most `max` content bytes; `Ok(None)` asks for more input
    /// or more room.
    pub fn decode_bounded(&mut self, src: &mut BytesMut, max: usize) -> Result<Option<PayloadItem>, ParseError> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() || max == 0 {
            return Ok(None);
        }

        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(src.len()).min(max);
        self.remaining -= n as u64;
        Ok(Some(PayloadItem::Chunk(src.split_to(n).freeze())))
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode_bounded(src, usize::MAX)
    }
}
