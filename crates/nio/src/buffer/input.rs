use crate::buffer::shared::SharedContentBuffer;
use crate::codec::ContentDecoder;
use crate::connection::IoControl;
use crate::protocol::{BufferError, ParseError};
use bytes::Buf;
use std::ops::Deref;
use std::sync::Weak;
use tracing::trace;

/// Request body buffer of a server connection.
///
/// The I/O thread fills it from the decoder with [`consume_content`], the
/// worker thread drains it with the blocking [`read`].
///
/// [`consume_content`]: SharedInputBuffer::consume_content
/// [`read`]: SharedInputBuffer::read
#[derive(Debug)]
pub struct SharedInputBuffer {
    shared: SharedContentBuffer,
    control: Weak<dyn IoControl>,
}

impl SharedInputBuffer {
    pub fn new(capacity: usize, control: Weak<dyn IoControl>) -> Self {
        Self { shared: SharedContentBuffer::new(capacity), control }
    }

    /// Moves decoded content into the buffer without blocking.
    ///
    /// Input interest is suspended once the buffer is full and resumed by
    /// the reader when it frees room.
    pub fn consume_content(&self, decoder: &mut dyn ContentDecoder) -> Result<usize, ParseError> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Ok(0);
        }

        let room = self.shared.capacity().saturating_sub(state.buf.len());
        let n = decoder.read(&mut state.buf, room)?;
        if decoder.is_completed() {
            state.end_of_stream = true;
        } else if state.buf.len() >= self.shared.capacity() {
            trace!(buffered = state.buf.len(), "input buffer full, suspend input");
            self.with_control(|control| control.suspend_input());
        }

        self.shared.notify_all();
        Ok(n)
    }

    /// Reads buffered content, blocking until some is available.
    ///
    /// Returns `Ok(0)` at end of stream, [`BufferError::Aborted`] once the
    /// buffer is shut down.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, BufferError> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        loop {
            if state.shutdown {
                return Err(BufferError::Aborted);
            }
            if !state.buf.is_empty() {
                break;
            }
            if state.end_of_stream || state.closed {
                return Ok(0);
            }
            self.with_control(|control| control.request_input());
            state = self.shared.wait(state);
        }

        let was_full = state.buf.len() >= self.shared.capacity();
        let n = dst.len().min(state.buf.len());
        dst[..n].copy_from_slice(&state.buf[..n]);
        state.buf.advance(n);

        if was_full && !state.end_of_stream && !state.closed {
            self.with_control(|control| control.request_input());
        }
        Ok(n)
    }

    /// Discards whatever is left of the current body, blocking until the
    /// I/O thread delivered all of it.
    pub fn drain(&self) -> Result<u64, BufferError> {
        let mut scratch = [0u8; 2048];
        let mut total = 0u64;
        loop {
            match self.read(&mut scratch)? {
                0 => return Ok(total),
                n => total += n as u64,
            }
        }
    }

    fn with_control<F: FnOnce(&dyn IoControl)>(&self, f: F) {
        if let Some(control) = self.control.upgrade() {
            f(control.as_ref());
        }
    }
}

impl Deref for SharedInputBuffer {
    type Target = SharedContentBuffer;

    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}
