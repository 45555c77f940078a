//! Body framing codecs.
//!
//! [`PayloadDecoder`] and [`PayloadEncoder`] pick the framing announced in a
//! message head: a fixed `Content-Length`, the chunked transfer coding, or
//! no body at all. Decoding can be capped to the room a caller has, which is
//! how a full shared buffer stops the reactor from reading further.

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
