use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Reads the body that follows a message head, using the framing the head
/// announced. Built from a [`PayloadSize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    framing: Framing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Framing {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    None,
}

impl PayloadDecoder {
    pub fn is_chunked(&self) -> bool {
        matches!(self.framing, Framing::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.framing, Framing::None)
    }

    /// True once the last body byte was taken off the source.
    pub fn is_finish(&self) -> bool {
        match &self.framing {
            Framing::Length(decoder) => decoder.is_finish(),
            Framing::Chunked(decoder) => decoder.is_finish(),
            Framing::None => true,
        }
    }

    /// Decodes at most `max` content bytes from `src`.
    ///
    /// Framing bytes (chunk sizes, trailers) are consumed regardless of
    /// `max`; only body content is bounded.
    pub fn decode_bounded(&mut self, src: &mut BytesMut, max: usize) -> Result<Option<PayloadItem>, ParseError> {
        match &mut self.framing {
            Framing::Length(decoder) => decoder.decode_bounded(src, max),
            Framing::Chunked(decoder) => decoder.decode_bounded(src, max),
            Framing::None => Ok(Some(PayloadItem::Eof)),
        }
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        let framing = match payload_size {
            PayloadSize::Length(n) => Framing::Length(LengthDecoder::new(n)),
            PayloadSize::Chunked => Framing::Chunked(ChunkedDecoder::new()),
            PayloadSize::Empty => Framing::None,
        };
        Self { framing }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode_bounded(src, usize::MAX)
    }
}
