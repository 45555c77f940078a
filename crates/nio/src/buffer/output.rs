use crate::buffer::shared::SharedContentBuffer;
use crate::codec::ContentEncoder;
use crate::connection::IoControl;
use crate::protocol::{BufferError, SendError};
use bytes::Buf;
use std::ops::Deref;
use std::sync::Weak;
use tracing::trace;

/// Response body buffer of a server connection.
///
/// The worker thread fills it with the blocking [`write`], the I/O thread
/// drains it into the encoder with [`produce_content`].
///
/// [`write`]: SharedOutputBuffer::write
/// [`produce_content`]: SharedOutputBuffer::produce_content
#[derive(Debug)]
pub struct SharedOutputBuffer {
    shared: SharedContentBuffer,
    control: Weak<dyn IoControl>,
}

impl SharedOutputBuffer {
    pub fn new(capacity: usize, control: Weak<dyn IoControl>) -> Self {
        Self { shared: SharedContentBuffer::new(capacity), control }
    }

    /// Moves buffered content into the encoder without blocking.
    ///
    /// Once the buffer runs dry the encoder is completed if the writer is
    /// done, otherwise output interest is suspended until more is written.
    pub fn produce_content(&self, encoder: &mut dyn ContentEncoder) -> Result<usize, SendError> {
        let mut state = self.shared.lock();
        if state.is_terminated() {
            return Ok(0);
        }

        let mut total = 0;
        while !state.buf.is_empty() {
            let n = encoder.write(&state.buf)?;
            if n == 0 {
                break;
            }
            state.buf.advance(n);
            total += n;
        }

        if state.buf.is_empty() {
            if state.end_of_stream {
                if !encoder.is_completed() {
                    encoder.complete()?;
                }
            } else {
                trace!("output buffer drained, suspend output");
                self.with_control(|control| control.suspend_output());
            }
        }

        self.shared.notify_all();
        Ok(total)
    }

    /// Appends all of `src`, blocking while the buffer is full.
    pub fn write(&self, src: &[u8]) -> Result<(), BufferError> {
        let mut state = self.shared.lock();
        if state.is_terminated() {
            return Err(BufferError::Aborted);
        }
        if state.end_of_stream {
            return Err(BufferError::Closed);
        }

        let mut remaining = src;
        while !remaining.is_empty() {
            if state.is_terminated() {
                return Err(BufferError::Aborted);
            }

            let room = self.shared.capacity().saturating_sub(state.buf.len());
            if room == 0 {
                self.with_control(|control| control.request_output());
                state = self.shared.wait(state);
                continue;
            }

            let n = room.min(remaining.len());
            state.buf.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
        }

        if !src.is_empty() {
            self.with_control(|control| control.request_output());
        }
        Ok(())
    }

    /// Blocks until the I/O thread took everything written so far.
    pub fn flush(&self) -> Result<(), BufferError> {
        let mut state = self.shared.lock();
        while !state.buf.is_empty() && !state.is_terminated() {
            self.with_control(|control| control.request_output());
            state = self.shared.wait(state);
        }
        if state.is_terminated() { Err(BufferError::Aborted) } else { Ok(()) }
    }

    /// Marks the end of the body; the encoder is completed once the buffer
    /// has drained.
    pub fn write_completed(&self) -> Result<(), BufferError> {
        let mut state = self.shared.lock();
        if state.is_terminated() {
            return Err(BufferError::Aborted);
        }
        if !state.end_of_stream {
            state.end_of_stream = true;
            self.with_control(|control| control.request_output());
        }
        Ok(())
    }

    fn with_control<F: FnOnce(&dyn IoControl)>(&self, f: F) {
        if let Some(control) = self.control.upgrade() {
            f(control.as_ref());
        }
    }
}

impl Deref for SharedOutputBuffer {
    type Target = SharedContentBuffer;

    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}
