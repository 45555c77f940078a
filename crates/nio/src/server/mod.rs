//! Server side exchange handling.
//!
//! [`ThrottlingServerHandler`] receives requests on the I/O thread and runs
//! the application's [`RequestHandler`] on an [`Executor`]. Request and
//! response bodies cross between the two through bounded shared buffers, so
//! a handler reads and writes them with plain blocking I/O while the I/O
//! thread never blocks.
//!
//! ```no_run
//! use http::{Request, Response};
//! use micro_nio::config::ExchangeConfig;
//! use micro_nio::connection::HttpContext;
//! use micro_nio::entity::{Body, RequestBody};
//! use micro_nio::protocol::HandlerError;
//! use micro_nio::server::{HandlerRegistry, ThrottlingServerHandler, make_handler};
//! use std::sync::Arc;
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
//! ```

mod executor;
mod handler;
mod throttling;

pub use executor::Executor;
pub use executor::Task;
pub use handler::ExpectationVerifier;
pub use handler::HandlerFn;
pub use handler::HandlerRegistry;
pub use handler::PathParams;
pub use handler::RequestHandler;
pub use handler::make_handler;
pub use throttling::ThrottlingServerHandler;
