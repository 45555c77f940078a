//! Adapters from a framing codec plus a session buffer to the content
//! codec contract.
//!
//! A reactor owns one session buffer per direction: bytes read off the
//! socket land in the inbound one, bytes to be flushed to the socket
//! accumulate in the outbound one. The adapters move body content between
//! those buffers and the exchange handlers while applying the framing.

use crate::codec::body::{PayloadDecoder, PayloadEncoder};
use crate::codec::{ContentDecoder, ContentEncoder};
use crate::protocol::{ParseError, PayloadItem, SendError};
use bytes::BytesMut;
use tokio_util::codec::Encoder;

#[derive(Debug)]
pub struct SessionDecoder<'a> {
    framing: &'a mut PayloadDecoder,
    session: &'a mut BytesMut,
}

impl<'a> SessionDecoder<'a> {
    pub fn new(framing: &'a mut PayloadDecoder, session: &'a mut BytesMut) -> Self {
        Self { framing, session }
    }
}

impl ContentDecoder for SessionDecoder<'_> {
    fn read(&mut self, dst: &mut BytesMut, max: usize) -> Result<usize, ParseError> {
        let mut total = 0;
        loop {
            match self.framing.decode_bounded(self.session, max - total)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    dst.extend_from_slice(&bytes);
                    total += bytes.len();
                }
                Some(PayloadItem::Eof) | None => return Ok(total),
            }
        }
    }

    fn is_completed(&self) -> bool {
        self.framing.is_finish()
    }
}

/// Encodes body content into the outbound session buffer.
///
/// `limit` caps the session buffer; once it holds that many bytes the
/// encoder accepts nothing until the reactor flushed some of them.
#[derive(Debug)]
pub struct SessionEncoder<'a> {
    framing: &'a mut PayloadEncoder,
    session: &'a mut BytesMut,
    limit: usize,
}

impl<'a> SessionEncoder<'a> {
    pub fn new(framing: &'a mut PayloadEncoder, session: &'a mut BytesMut, limit: usize) -> Self {
        Self { framing, session, limit }
    }
}

impl ContentEncoder for SessionEncoder<'_> {
    fn write(&mut self, src: &[u8]) -> Result<usize, SendError> {
        if src.is_empty() {
            return Ok(0);
        }

        let room = self.limit.saturating_sub(self.session.len());
        let mut n = src.len().min(room);
        if let Some(remaining) = self.framing.remaining_length() {
            n = n.min(usize::try_from(remaining).unwrap_or(usize::MAX));
            if remaining == 0 {
                return Err(SendError::invalid_body("content exceeds the declared length"));
            }
        }

        if n > 0 {
            self.framing.encode(PayloadItem::Chunk(&src[..n]), self.session)?;
        }
        Ok(n)
    }

    fn complete(&mut self) -> Result<(), SendError> {
        if self.framing.is_finish() {
            return Ok(());
        }
        self.framing.encode(PayloadItem::<&[u8]>::Eof, self.session)
    }

    fn is_completed(&self) -> bool {
        self.framing.is_finish()
    }
}
