//! The contract between a reactor and the exchange handlers.
//!
//! A reactor owns the sockets and the single I/O thread. It reports events
//! to a [`ClientEventHandler`] or [`ServerEventHandler`] and the handlers
//! steer it back through the connection object passed with every event:
//!
//! - [`IoControl`]: input/output interest and hard shutdown, the only part a
//!   worker thread may touch.
//! - [`HttpConnection`]: framing reset, graceful close and socket timeouts.
//! - [`ClientConnection`] / [`ServerConnection`]: submitting message heads.
//!
//! The reactor derives the framing of the body that follows a submitted or
//! received head from its `Content-Length` / `Transfer-Encoding` headers and
//! hands body content to the handlers through content codecs. Per connection
//! state lives in the handler's `Session`, owned by the reactor's connection
//! object and passed back with every event.
//!
//! All callbacks of one connection run on the I/O thread, one at a time, and
//! must return promptly.

mod client_state;
mod context;
mod listener;
mod reuse;
mod server_state;

pub use client_state::ClientConnState;
pub use client_state::ClientInputState;
pub use client_state::ClientOutputState;
pub use context::HttpContext;
pub use listener::EventListener;
pub use listener::LoggingEventListener;
pub use reuse::ConnectionReuseStrategy;
pub use reuse::DefaultConnectionReuseStrategy;
pub use server_state::ServerConnState;
pub use server_state::ServerExchange;
pub use server_state::ServerInputState;
pub use server_state::ServerOutputState;

use crate::codec::{ContentDecoder, ContentEncoder};
use crate::protocol::{HttpError, RequestHead, ResponseHead};
use std::sync::Arc;
use std::time::Duration;

/// Interest control of a connection. Safe to call from any thread.
pub trait IoControl: Send + Sync {
    fn request_input(&self);

    fn suspend_input(&self);

    fn request_output(&self);

    fn suspend_output(&self);

    /// Closes the connection immediately, dropping unsent data.
    fn shutdown(&self);
}

pub trait HttpConnection: IoControl {
    /// Forgets the inbound message in flight; bytes still to come are read
    /// as the start of the next message.
    fn reset_input(&self);

    /// Forgets the outbound message in flight, its body is never completed.
    fn reset_output(&self);

    fn is_open(&self) -> bool;

    /// Closes the connection once pending output has been flushed.
    fn close(&self);

    fn socket_timeout(&self) -> Duration;

    fn set_socket_timeout(&self, timeout: Duration);
}

pub trait ClientConnection: HttpConnection {
    /// Queues a request head; its body, if the head announces one, is
    /// requested through [`ClientEventHandler::output_ready`].
    fn submit_request(&self, head: &RequestHead) -> Result<(), HttpError>;

    /// True while a submitted request is still being written.
    fn is_request_submitted(&self) -> bool;
}

pub trait ServerConnection: HttpConnection {
    /// Queues a response head; its body, if the head announces one, is
    /// requested through [`ServerEventHandler::output_ready`].
    fn submit_response(&self, head: &ResponseHead) -> Result<(), HttpError>;

    /// True while a submitted response is still being written.
    fn is_response_submitted(&self) -> bool;
}

/// Events of a client connection.
pub trait ClientEventHandler {
    type Session;

    fn connected(&self, conn: &dyn ClientConnection) -> Self::Session;

    /// Output is enabled and no request is being written.
    fn request_ready(&self, conn: &dyn ClientConnection, session: &mut Self::Session);

    /// The request body may be written.
    fn output_ready(&self, conn: &dyn ClientConnection, session: &mut Self::Session, encoder: &mut dyn ContentEncoder);

    fn response_received(&self, conn: &dyn ClientConnection, session: &mut Self::Session, head: ResponseHead);

    /// Response body content is available.
    fn input_ready(&self, conn: &dyn ClientConnection, session: &mut Self::Session, decoder: &mut dyn ContentDecoder);

    fn exception(&self, conn: &dyn ClientConnection, session: &mut Self::Session, error: HttpError);

    /// The socket timeout elapsed without any activity.
    fn timeout(&self, conn: &dyn ClientConnection, session: &mut Self::Session);

    fn closed(&self, conn: &dyn ClientConnection, session: &mut Self::Session);
}

/// Events of a server connection.
///
/// The connection is passed as an `Arc` so the handler can hand it to
/// worker threads.
pub trait ServerEventHandler {
    type Session;

    fn connected(&self, conn: &Arc<dyn ServerConnection>) -> Self::Session;

    fn request_received(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session, head: RequestHead);

    /// Request body content is available.
    fn input_ready(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session, decoder: &mut dyn ContentDecoder);

    /// Output is enabled and no response is being written.
    fn response_ready(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session);

    /// The response body may be written.
    fn output_ready(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session, encoder: &mut dyn ContentEncoder);

    fn exception(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session, error: HttpError);

    fn timeout(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session);

    fn closed(&self, conn: &Arc<dyn ServerConnection>, session: &mut Self::Session);
}
