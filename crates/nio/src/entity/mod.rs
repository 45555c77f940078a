//! Message entities.
//!
//! On the client side entities run on the I/O thread and must never block:
//! a [`ProducingEntity`] writes the request body into the content encoder
//! whenever the channel is writable, a [`ConsumingEntity`] takes the response
//! body from the content decoder whenever data arrived.
//!
//! On the server side entities are plain blocking streams used by the
//! request handler on its worker thread: [`RequestBody`] reads the request
//! body from the shared input buffer, [`Body`] describes the response body
//! the worker writes into the shared output buffer.

mod body;
mod consumer;
mod producer;

pub use body::Body;
pub use body::RequestBody;
pub use consumer::BufferingConsumer;
pub use consumer::SkipConsumer;
pub use producer::BytesProducer;

use crate::codec::{ContentDecoder, ContentEncoder};
use crate::connection::IoControl;
use crate::protocol::{ParseError, PayloadSize, SendError};
use bytes::Bytes;

/// Non-blocking source of an outgoing body.
pub trait ProducingEntity: Send {
    /// Framing announced in the message head.
    fn payload_size(&self) -> PayloadSize;

    /// Writes as much content as the encoder accepts and completes the
    /// encoder once everything was written. An entity that has nothing to
    /// hand out right now may suspend output through `control`.
    fn produce_content(&mut self, encoder: &mut dyn ContentEncoder, control: &dyn IoControl) -> Result<(), SendError>;

    /// Releases the entity, called exactly once when the exchange lets go of
    /// it, whether the body was fully written or not.
    fn finish(&mut self) {}
}

/// Non-blocking sink of an incoming body.
pub trait ConsumingEntity: Send {
    /// Takes whatever content the decoder has available.
    fn consume_content(&mut self, decoder: &mut dyn ContentDecoder, control: &dyn IoControl) -> Result<(), ParseError>;

    /// Releases the entity, see [`ProducingEntity::finish`].
    fn finish(&mut self) {}

    /// The collected content, for entities that keep it.
    fn into_bytes(self: Box<Self>) -> Option<Bytes> {
        None
    }
}
