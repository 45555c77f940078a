use http::{Method, StatusCode, Version};
use std::error::Error;
use std::io;
use thiserror::Error;

/// Top-level error of a message exchange.
///
/// This is what the reactor reports through the `exception` callbacks and
/// what the client application receives through its failure signal.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("connection closed before the exchange completed")]
    ConnectionClosed,

    #[error("connection timed out")]
    Timeout,

    #[error("illegal state transition: {reason}")]
    IllegalState { reason: String },
}

impl HttpError {
    pub fn illegal_state<S: ToString>(str: S) -> Self {
        Self::IllegalState { reason: str.to_string() }
    }

    /// Transport failures are fatal to the connection and lead to a hard
    /// shutdown; everything else is a protocol violation closed gracefully.
    pub fn is_transport(&self) -> bool {
        match self {
            HttpError::Io { .. } | HttpError::Timeout => true,
            HttpError::RequestError { source } => source.is_io(),
            HttpError::ResponseError { source } => source.is_io(),
            HttpError::ConnectionClosed | HttpError::IllegalState { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    /// Reported by a reactor whose head parser met an unsupported version.
    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<Version>),

    #[error("invalid http method: {0}")]
    InvalidMethod(Method),

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, ParseError::Io { .. })
    }

    /// The status of the best-effort error response sent for this violation.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ParseError::InvalidVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            ParseError::InvalidMethod(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, SendError::Io { .. })
    }
}

/// Failure of a blocking operation on a shared content buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer was shut down or its connection torn down while the
    /// caller was using it.
    #[error("content buffer operation aborted")]
    Aborted,

    /// The producer already signalled end of stream.
    #[error("content buffer already closed for writing")]
    Closed,
}

impl From<BufferError> for io::Error {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Aborted => io::Error::new(io::ErrorKind::ConnectionAborted, e),
            BufferError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, e),
        }
    }
}

/// Returns true if the io error originates from an aborted content buffer.
pub fn is_aborted(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionAborted
        && e.get_ref().and_then(|inner| inner.downcast_ref::<BufferError>()).is_some_and(|inner| *inner == BufferError::Aborted)
}

/// Failure raised by an application request handler or expectation verifier.
///
/// The server recovers from it locally by answering with a synthetic error
/// response, see [`HandlerError::status_code`].
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0} method not supported")]
    MethodNotSupported(Method),

    #[error("unsupported http version: {0:?}")]
    UnsupportedVersion(Version),

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn protocol<S: ToString>(str: S) -> Self {
        Self::Protocol { reason: str.to_string() }
    }

    pub fn other<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> Self {
        Self::Other(e.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::MethodNotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            HandlerError::UnsupportedVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            HandlerError::Protocol { .. } => StatusCode::BAD_REQUEST,
            HandlerError::Io { .. } | HandlerError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
