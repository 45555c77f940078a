use crate::connection::HttpContext;
use crate::entity::{Body, RequestBody};
use crate::protocol::{HandlerError, RequestHead, ResponseHead};
use http::{Request, Response, StatusCode};
use std::fmt;
use tracing::debug;

/// Application code run on a worker thread for every request.
///
/// The handler may block: reading the request body waits for the I/O
/// thread to deliver it, and the response body is written only after the
/// handler returned.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request<RequestBody>, response: &mut Response<Body>, context: &mut HttpContext) -> Result<(), HandlerError>;
}

impl<H: RequestHandler + ?Sized> RequestHandler for Box<H> {
    fn handle(&self, request: Request<RequestBody>, response: &mut Response<Body>, context: &mut HttpContext) -> Result<(), HandlerError> {
        (**self).handle(request, response, context)
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F, E> RequestHandler for HandlerFn<F>
where
    F: Fn(Request<RequestBody>, &mut Response<Body>, &mut HttpContext) -> Result<(), E> + Send + Sync,
    E: Into<HandlerError>,
{
    fn handle(&self, request: Request<RequestBody>, response: &mut Response<Body>, context: &mut HttpContext) -> Result<(), HandlerError> {
        (self.f)(request, response, context).map_err(Into::into)
    }
}

pub fn make_handler<F, E>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<RequestBody>, &mut Response<Body>, &mut HttpContext) -> Result<(), E> + Send + Sync,
    E: Into<HandlerError>,
{
    HandlerFn { f }
}

/// Decides whether a request announcing `Expect: 100-continue` may send
/// its body.
///
/// `response` starts out as `100 Continue`. Setting a final status fails
/// the expectation: that response is sent instead and the body is never
/// read. An error is answered like a failing request handler.
pub trait ExpectationVerifier: Send + Sync {
    fn verify(&self, request: &RequestHead, response: &mut ResponseHead, context: &mut HttpContext) -> Result<(), HandlerError>;
}

impl<F> ExpectationVerifier for F
where
    F: Fn(&RequestHead, &mut ResponseHead, &mut HttpContext) -> Result<(), HandlerError> + Send + Sync,
{
    fn verify(&self, request: &RequestHead, response: &mut ResponseHead, context: &mut HttpContext) -> Result<(), HandlerError> {
        self(request, response, context)
    }
}

/// Parameters captured by the route that matched the current request,
/// available to the handler through its [`HttpContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<matchit::Params<'_, '_>> for PathParams {
    fn from(params: matchit::Params<'_, '_>) -> Self {
        Self { params: params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect() }
    }
}

/// Dispatches requests to handlers by path pattern.
///
/// Patterns use the `matchit` syntax (`/users/{id}`, `/static/{*path}`).
/// A request no pattern matches is answered with `501 Not Implemented`.
pub struct HandlerRegistry {
    router: matchit::Router<Box<dyn RequestHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { router: matchit::Router::new() }
    }

    pub fn register<H>(&mut self, pattern: &str, handler: H) -> Result<(), matchit::InsertError>
    where
        H: RequestHandler + 'static,
    {
        self.router.insert(pattern, Box::new(handler))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}

impl RequestHandler for HandlerRegistry {
    fn handle(&self, request: Request<RequestBody>, response: &mut Response<Body>, context: &mut HttpContext) -> Result<(), HandlerError> {
        let path = request.uri().path().to_owned();
        match self.router.at(&path) {
            Ok(matched) => {
                context.insert(PathParams::from(matched.params));
                matched.value.handle(request, response, context)
            }
            Err(e) => {
                debug!(%path, cause = %e, "no handler registered");
                *response.status_mut() = StatusCode::NOT_IMPLEMENTED;
                Ok(())
            }
        }
    }
}
