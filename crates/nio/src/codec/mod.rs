//! Content codecs for streaming message bodies
//!
//! The exchange handlers never see framing. They talk to the reactor through
//! two small capabilities:
//!
//! - [`ContentDecoder`]: hands out decoded body content of the inbound message,
//!   bounded by the room the caller has.
//! - [`ContentEncoder`]: accepts body content of the outbound message and
//!   reports how much of it fit.
//!
//! The concrete framing lives in [`body`]: content-length, chunked transfer
//! coding and empty bodies, driven by a [`PayloadSize`](crate::protocol::PayloadSize)
//! derived with [`payload_size`]. [`SessionDecoder`] and [`SessionEncoder`]
//! glue a framing codec to a reactor's session buffers.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use micro_nio::codec::{ContentDecoder, PayloadDecoder, SessionDecoder};
//! use micro_nio::protocol::PayloadSize;
//!
//! let mut framing = PayloadDecoder::from(PayloadSize::Chunked);
//! let mut session = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
//! let mut content = BytesMut::new();
//!
//! let mut decoder = SessionDecoder::new(&mut framing, &mut session);
//! assert_eq!(decoder.read(&mut content, 1024).unwrap(), 5);
//! assert!(decoder.is_completed());
//! assert_eq!(&content[..], b"hello");
//! ```

mod body;
mod framing;
mod session;

pub use body::PayloadDecoder;
pub use body::PayloadEncoder;
pub use framing::apply_payload_size;
pub use framing::payload_size;
pub use session::SessionDecoder;
pub use session::SessionEncoder;

use crate::protocol::{ParseError, SendError};
use bytes::BytesMut;

/// Source of decoded body content of an inbound message.
pub trait ContentDecoder {
    /// Appends at most `max` bytes of content to `dst`, returning how many
    /// were appended. Never blocks; `0` means nothing is available right now.
    fn read(&mut self, dst: &mut BytesMut, max: usize) -> Result<usize, ParseError>;

    /// True once the whole body has been decoded.
    fn is_completed(&self) -> bool;
}

/// Sink for body content of an outbound message.
pub trait ContentEncoder {
    /// Encodes a prefix of `src` and returns its length. Never blocks; `0`
    /// means the channel is saturated.
    fn write(&mut self, src: &[u8]) -> Result<usize, SendError>;

    /// Marks the end of the body, emitting whatever terminator the framing
    /// needs.
    fn complete(&mut self) -> Result<(), SendError>;

    fn is_completed(&self) -> bool;
}
