use crate::connection::HttpConnection;
use crate::protocol::HttpError;
use tracing::{debug, error, info, warn};

/// Observer of connection level events. Every method defaults to a no-op.
pub trait EventListener: Send + Sync {
    fn connection_open(&self, _conn: &dyn HttpConnection) {}

    fn connection_closed(&self, _conn: &dyn HttpConnection) {}

    fn connection_timeout(&self, _conn: &dyn HttpConnection) {}

    /// A transport failure, the connection has been shut down.
    fn fatal_io_error(&self, _error: &HttpError, _conn: &dyn HttpConnection) {}

    /// A protocol violation, the connection is being closed.
    fn fatal_protocol_error(&self, _error: &HttpError, _conn: &dyn HttpConnection) {}
}

/// Reports connection events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn connection_open(&self, _conn: &dyn HttpConnection) {
        debug!("connection open");
    }

    fn connection_closed(&self, _conn: &dyn HttpConnection) {
        debug!("connection closed");
    }

    fn connection_timeout(&self, _conn: &dyn HttpConnection) {
        info!("connection timed out");
    }

    fn fatal_io_error(&self, e: &HttpError, _conn: &dyn HttpConnection) {
        error!(cause = %e, "i/o error, connection shutdown");
    }

    fn fatal_protocol_error(&self, e: &HttpError, _conn: &dyn HttpConnection) {
        warn!(cause = %e, "protocol error, connection closing");
    }
}
