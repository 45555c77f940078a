//! Derives message framing from headers and writes it back.
//!
//! refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length>

use crate::protocol::{ParseError, PayloadSize};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue};

/// Determines how the body following a head is framed.
///
/// A head without `Content-Length` and `Transfer-Encoding` carries no body.
/// Both present at once is rejected, as is a transfer coding list that does
/// not end in `chunked`.
pub fn payload_size(headers: &HeaderMap) -> Result<PayloadSize, ParseError> {
    let te_header = headers.get(TRANSFER_ENCODING);
    let cl_header = headers.get(CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_header("transfer-encoding must end with chunked"))
            }
        }

        (None, Some(_)) => {
            let mut length = None;
            for cl_value in headers.get_all(CONTENT_LENGTH) {
                let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
                let value =
                    cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
                match length {
                    Some(previous) if previous != value => {
                        return Err(ParseError::invalid_content_length("conflicting content-length values"));
                    }
                    _ => length = Some(value),
                }
            }

            Ok(PayloadSize::new_length(length.unwrap_or_default()))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// Replaces the framing headers so that they announce `payload_size`.
pub fn apply_payload_size(headers: &mut HeaderMap, payload_size: PayloadSize) {
    headers.remove(TRANSFER_ENCODING);
    match payload_size {
        PayloadSize::Length(n) => {
            headers.insert(CONTENT_LENGTH, n.into());
        }
        PayloadSize::Chunked => {
            headers.remove(CONTENT_LENGTH);
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        PayloadSize::Empty => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
    }
}

/// Chunked must be the last coding if present.
fn is_chunked(value: &HeaderValue) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(CHUNKED))
}
