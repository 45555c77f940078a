use crate::buffer::{SharedInputBuffer, SharedOutputBuffer};
use std::io;
use std::sync::Arc;

/// Blocking [`io::Read`] view of a [`SharedInputBuffer`].
#[derive(Debug, Clone)]
pub struct ContentInputStream {
    buffer: Arc<SharedInputBuffer>,
}

impl ContentInputStream {
    pub fn new(buffer: Arc<SharedInputBuffer>) -> Self {
        Self { buffer }
    }
}

impl io::Read for ContentInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.buffer.read(buf)?)
    }
}

/// Blocking [`io::Write`] view of a [`SharedOutputBuffer`].
///
/// `write` accepts the whole slice, blocking while the buffer is full;
/// `flush` waits until the I/O thread took everything.
#[derive(Debug, Clone)]
pub struct ContentOutputStream {
    buffer: Arc<SharedOutputBuffer>,
}

impl ContentOutputStream {
    pub fn new(buffer: Arc<SharedOutputBuffer>) -> Self {
        Self { buffer }
    }
}

impl io::Write for ContentOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.buffer.flush()?)
    }
}
