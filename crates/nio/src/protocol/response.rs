//! HTTP response head handling.
//!
//! This module provides type definitions for HTTP response heads together
//! with the rule that decides whether a response may carry a body at all.

use http::{Method, Response, StatusCode};

/// Type alias for HTTP response headers.
///
/// This type represents the header portion of an HTTP response, using
/// `http::Response<()>` with an empty body placeholder.
pub type ResponseHead = Response<()>;

/// Splits a response into its head and its body.
pub fn into_head<T>(response: Response<T>) -> (ResponseHead, T) {
    let (parts, body) = response.into_parts();
    (Response::from_parts(parts, ()), body)
}

/// Returns false when the response must not carry a body: responses to
/// `HEAD`, informational (1xx) responses, `204`, `304` and successful
/// responses to `CONNECT`.
pub fn can_response_have_body(method: &Method, status: StatusCode) -> bool {
    if *method == Method::HEAD {
        return false;
    }

    if *method == Method::CONNECT && status.is_success() {
        return false;
    }

    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

/// Copies a response head, see [`copy_head`](super::request::copy_head).
pub fn copy_head(head: &ResponseHead) -> ResponseHead {
    let mut copy = Response::new(());
    *copy.status_mut() = head.status();
    *copy.version_mut() = head.version();
    *copy.headers_mut() = head.headers().clone();
    copy
}
