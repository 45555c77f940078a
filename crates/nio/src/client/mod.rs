//! Client side exchange handling.
//!
//! [`ClientExchangeHandler`] drives one request/response exchange at a time
//! over a [`ClientConnection`](crate::connection::ClientConnection), entirely
//! on the I/O thread. The application plugs in through
//! [`RequestExecutionHandler`]: it hands out requests, optionally supplies a
//! sink for each response body and receives the completed responses or the
//! failure of an exchange.

mod handler;

pub use handler::ClientExchangeHandler;

use crate::connection::HttpContext;
use crate::entity::{ConsumingEntity, ProducingEntity};
use crate::protocol::{HttpError, ResponseHead};
use http::{Request, Response};

/// A request with an optional body source.
pub type ClientRequest = Request<Option<Box<dyn ProducingEntity>>>;

/// A completed response with the body sink that consumed its content.
pub type ClientResponse = Response<Option<Box<dyn ConsumingEntity>>>;

/// Application side of a client connection.
pub trait RequestExecutionHandler {
    /// Called once when the connection is established.
    fn initialize_context(&self, _context: &mut HttpContext) {}

    /// The next request to send, `None` when there is nothing to do.
    fn submit_request(&self, context: &mut HttpContext) -> Option<ClientRequest>;

    /// Sink for the body of `response`; the body is skipped when `None`.
    fn response_entity(&self, _response: &ResponseHead, _context: &mut HttpContext) -> Option<Box<dyn ConsumingEntity>> {
        None
    }

    fn handle_response(&self, response: ClientResponse, context: &mut HttpContext);

    /// The exchange in flight was aborted; called once per exchange.
    fn failed(&self, _error: &HttpError, _context: &mut HttpContext) {}

    /// Called once when the connection is gone.
    fn finalize_context(&self, _context: &mut HttpContext) {}
}
