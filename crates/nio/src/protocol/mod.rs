//! Core HTTP protocol abstractions.
//!
//! The exchange engine does not own a message model of its own; heads are the
//! standard `http` types with an empty body placeholder and entities travel
//! separately. This module holds those aliases together with the framing
//! types shared by the codecs and the error taxonomy.
//!
//! - **Message heads** ([`request`], [`response`]): [`RequestHead`],
//!   [`ResponseHead`], the `Expect: 100-continue` check and the rule deciding
//!   whether a response may carry a body.
//! - **Payload** ([`message`]): [`PayloadItem`] and [`PayloadSize`].
//! - **Errors** ([`error`]): [`HttpError`] for exchanges, [`ParseError`] and
//!   [`SendError`] for the codecs, [`BufferError`] for the shared buffers and
//!   [`HandlerError`] for application handlers.

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

pub mod request;
pub use request::RequestHead;

pub mod response;
pub use response::ResponseHead;
pub use response::can_response_have_body;

mod error;
pub use error::BufferError;
pub use error::HandlerError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
pub use error::is_aborted;
