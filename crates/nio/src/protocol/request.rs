//! HTTP request head handling.
//!
//! A request head is the request line plus headers of a message, without
//! its entity. It uses the standard `http::Request` type with an empty
//! body placeholder, the same way [`ResponseHead`](super::ResponseHead)
//! does for responses.

use http::header::EXPECT;
use http::{Request, Version};

/// Type alias for HTTP request heads.
pub type RequestHead = Request<()>;

const CONTINUE_EXPECTATION: &[u8] = b"100-continue";

/// Splits a request into its head and its body.
pub fn into_head<T>(request: Request<T>) -> (RequestHead, T) {
    let (parts, body) = request.into_parts();
    (Request::from_parts(parts, ()), body)
}

/// Returns true if the request carries an `Expect: 100-continue` directive.
///
/// HTTP/1.0 peers do not understand interim responses, so the directive is
/// ignored for them.
pub fn expects_continue(head: &RequestHead) -> bool {
    if head.version() < Version::HTTP_11 {
        return false;
    }

    head.headers().get_all(EXPECT).iter().any(|value| value.as_bytes().trim_ascii().eq_ignore_ascii_case(CONTINUE_EXPECTATION))
}

/// Copies a request head; heads are handed to a connection by reference and
/// the loopback transport needs an owned copy to put on the wire.
pub fn copy_head(head: &RequestHead) -> RequestHead {
    let mut copy = Request::new(());
    *copy.method_mut() = head.method().clone();
    *copy.uri_mut() = head.uri().clone();
    *copy.version_mut() = head.version();
    *copy.headers_mut() = head.headers().clone();
    copy
}
