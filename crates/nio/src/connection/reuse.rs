use crate::codec::payload_size;
use crate::connection::HttpConnection;
use crate::protocol::{PayloadSize, ResponseHead};
use http::Version;
use http::header::CONNECTION;

/// Decides whether a connection stays open after an exchange.
pub trait ConnectionReuseStrategy: Send + Sync {
    fn keep_alive(&self, response: &ResponseHead, conn: &dyn HttpConnection) -> bool;
}

/// Keep-alive per HTTP/1.x persistence rules.
///
/// - a closed connection, or `Connection: close`, ends it
/// - `Connection: keep-alive` keeps it
/// - a chunked body on HTTP/1.0 ends it, the peer may not understand it
/// - otherwise HTTP/1.1 and newer keep it, older versions end it
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnectionReuseStrategy;

impl ConnectionReuseStrategy for DefaultConnectionReuseStrategy {
    fn keep_alive(&self, response: &ResponseHead, conn: &dyn HttpConnection) -> bool {
        if !conn.is_open() {
            return false;
        }

        let version = response.version();
        if version <= Version::HTTP_10 && matches!(payload_size(response.headers()), Ok(PayloadSize::Chunked)) {
            return false;
        }

        let mut keep_alive_token = false;
        for token in response.headers().get_all(CONNECTION).iter().flat_map(|value| value.as_bytes().split(|b| *b == b',')) {
            let token = token.trim_ascii();
            if token.eq_ignore_ascii_case(b"close") {
                return false;
            }
            if token.eq_ignore_ascii_case(b"keep-alive") {
                keep_alive_token = true;
            }
        }

        keep_alive_token || version >= Version::HTTP_11
    }
}
