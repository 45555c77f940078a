//! A non-blocking HTTP/1.x message exchange engine
//!
//! This crate sits between an event-driven reactor, which owns the sockets
//! and parses message heads, and application code. It moves message bodies
//! between the I/O thread and the application under bounded memory, and it
//! drives the request/response state machines of both ends of a connection.
//!
//! # Features
//!
//! - Bounded shared content buffers with back-pressure on both directions
//! - Client exchanges with `Expect: 100-continue` handling and a wait timeout
//! - Server exchanges processed on a worker pool, with pipelined responses
//!   kept in request order
//! - Length delimited, chunked and identity body framing
//! - Keep-alive and connection reuse decisions
//! - An in-memory reactor for running both ends of a connection in process
//!
//! # Example
//!
//! ```no_run
//! use http::{Request, Response};
//! use micro_nio::client::{ClientExchangeHandler, ClientRequest, ClientResponse, RequestExecutionHandler};
//! use micro_nio::config::ExchangeConfig;
//! use micro_nio::connection::HttpContext;
//! use micro_nio::entity::{Body, RequestBody};
//! use micro_nio::loopback::Loopback;
//! use micro_nio::protocol::HandlerError;
//! use micro_nio::server::{HandlerRegistry, ThrottlingServerHandler, make_handler};
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use tracing::info;
//!
//! struct OneShot {
//!     pending: Mutex<Option<ClientRequest>>,
//!     done: Mutex<Option<ClientResponse>>,
//! }
//!
//! impl RequestExecutionHandler for OneShot {
//!     fn submit_request(&self, _: &mut HttpContext) -> Option<ClientRequest> {
//!         self.pending.lock().unwrap().take()
//!     }
//!
//!     fn handle_response(&self, response: ClientResponse, _: &mut HttpContext) {
//!         *self.done.lock().unwrap() = Some(response);
//!     }
//! }
//!
//! fn hello(_: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext) -> Result<(), HandlerError> {
//!     *response.body_mut() = Body::from("Hello World!\r\n");
//!     Ok(())
//! }
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let mut registry = HandlerRegistry::new();
//! registry.register("/", make_handler(hello)).unwrap();
//! let server = ThrottlingServerHandler::new(registry, Arc::new(runtime.handle().clone()), ExchangeConfig::default());
//!
//! let request = Request::get("/").body(None).unwrap();
//! let client = OneShot { pending: Mutex::new(Some(request)), done: Mutex::new(None) };
//! let client = ClientExchangeHandler::new(client, ExchangeConfig::default());
//!
//! let mut loopback = Loopback::new(client, server);
//! loopback.run_until(Duration::from_secs(5), |client, _| client.exec_handler().done.lock().unwrap().is_some());
//! info!("exchange finished");
//! ```
//!
//! # Architecture
//!
//! - [`buffer`]: bounded buffers shared by the I/O thread and worker threads
//! - [`codec`]: body framing, content decoders and encoders
//! - [`connection`]: the reactor callback contract and per-connection state
//! - [`client`]: the client exchange coordinator
//! - [`server`]: the throttling server handler and request dispatch
//! - [`entity`]: producers and consumers of message bodies
//! - [`loopback`]: an in-memory reactor
//! - [`protocol`]: message heads and error types
//!
//! # Threading
//!
//! Every event callback runs on the I/O thread and never blocks. Server
//! request handlers run on an [`Executor`](server::Executor) and may block on
//! the shared buffers; the I/O thread resumes them by requesting input or
//! output on the connection. Buffers use [`std::sync::Mutex`] and
//! [`std::sync::Condvar`], so the engine works with any reactor, async or
//! not.
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - Head parsing and socket I/O belong to the reactor
//! - No TLS support

pub mod buffer;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod entity;
pub mod loopback;
pub mod protocol;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
