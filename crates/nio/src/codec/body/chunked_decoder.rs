//! Decoding of the chunked transfer coding (RFC 9112, section 7.1).
//!
//! The decoder works line by line for the framing parts (size lines and
//! trailer fields) and hands out chunk data as soon as any of it arrived,
//! so a large chunk never has to be buffered completely.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

/// Longest size or trailer line accepted, extensions included.
const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SizeLine,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::SizeLine }
    }

    /// True once the last chunk and the trailer section were read.
    pub fn is_finish(&self) -> bool {
        self.state == State::Done
    }

    /// Decodes from `src`, handing out at most `max` bytes of content.
    ///
    /// Framing bytes are consumed even when `max` is zero, so the end of the
    /// body is detected without any room left. `Ok(None)` asks for more
    /// input, or for room when the decoder sits inside a chunk.
    pub fn decode_bounded(&mut self, src: &mut BytesMut, max: usize) -> Result<Option<PayloadItem>, ParseError> {
        loop {
            match self.state {
                State::Done => return Ok(Some(PayloadItem::Eof)),

                State::SizeLine => {
                    let Some(line) = next_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    trace!(size, "chunk size read");
                    self.state = if size == 0 { State::Trailers } else { State::Data { remaining: size } };
                }

                State::Data { remaining } => {
                    if src.is_empty() || max == 0 {
                        return Ok(None);
                    }
                    let n = usize::try_from(remaining).unwrap_or(usize::MAX).min(src.len()).min(max);
                    let left = remaining - n as u64;
                    self.state = if left == 0 { State::DataEnd } else { State::Data { remaining: left } };
                    return Ok(Some(PayloadItem::Chunk(src.split_to(n).freeze())));
                }

                State::DataEnd => {
                    if src.len() < 2 {
                        if src.first().is_some_and(|b| *b != b'\r') {
                            return Err(ParseError::invalid_body("chunk data not followed by CRLF"));
                        }
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(ParseError::invalid_body("chunk data not followed by CRLF"));
                    }
                    src.advance(2);
                    self.state = State::SizeLine;
                }

                State::Trailers => {
                    let Some(line) = next_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        trace!("chunked body finished");
                        self.state = State::Done;
                    } else {
                        // trailer fields are not surfaced
                        trace!(len = line.len(), "skip trailer field");
                    }
                }
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode_bounded(src, usize::MAX)
    }
}

/// Takes one CRLF terminated line off `src`, without its terminator.
fn next_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    let Some(lf) = src.iter().position(|b| *b == b'\n') else {
        if src.len() > MAX_LINE_LEN {
            return Err(ParseError::invalid_body("chunk framing line too long"));
        }
        return Ok(None);
    };

    if lf == 0 || src[lf - 1] != b'\r' {
        return Err(ParseError::invalid_body("bare LF in chunk framing"));
    }
    if lf > MAX_LINE_LEN {
        return Err(ParseError::invalid_body("chunk framing line too long"));
    }

    let mut line = src.split_to(lf + 1);
    line.truncate(lf - 1);
    if line.contains(&b'\r') {
        return Err(ParseError::invalid_body("bare CR in chunk framing"));
    }
    Ok(Some(line))
}

/// Parses `chunk-size [ chunk-ext ]`; extensions are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let digits = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii_end();
    if digits.is_empty() {
        return Err(ParseError::invalid_body("missing chunk size"));
    }

    digits.iter().try_fold(0u64, |size, b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(ParseError::invalid_body(format!("invalid chunk size digit {:?}", char::from(*b)))),
        };
        size.checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or_else(|| ParseError::invalid_body("chunk size overflows"))
    })
}
