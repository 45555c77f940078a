use crate::buffer::ContentInputStream;
use crate::protocol::PayloadSize;
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read, Write};

type WriteFn = Box<dyn FnOnce(&mut dyn Write) -> io::Result<()> + Send>;

/// Response body produced by a request handler.
///
/// The worker writes it into the connection's shared output buffer after
/// the handler returned, so a reader or writer body may be arbitrarily
/// large without being held in memory.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Bytes(Bytes),
    Reader { reader: Box<dyn Read + Send>, length: Option<u64> },
    Writer { write_fn: WriteFn, length: Option<u64> },
}

impl Body {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// A body streamed from `reader`; without a length it is sent chunked.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, length: Option<u64>) -> Self {
        Self { kind: Kind::Reader { reader: Box::new(reader), length } }
    }

    /// A body written by `write_fn` on the worker thread; without a length
    /// it is sent chunked.
    pub fn from_writer<F>(length: Option<u64>, write_fn: F) -> Self
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    {
        Self { kind: Kind::Writer { write_fn: Box::new(write_fn), length } }
    }

    pub fn is_empty(&self) -> bool {
        self.payload_size().is_empty()
    }

    pub fn payload_size(&self) -> PayloadSize {
        match &self.kind {
            Kind::Empty => PayloadSize::Empty,
            Kind::Bytes(bytes) => PayloadSize::new_length(bytes.len() as u64),
            Kind::Reader { length, .. } | Kind::Writer { length, .. } => PayloadSize::from(*length),
        }
    }

    /// Writes the whole body into `out`, blocking as `out` does.
    pub fn write_to(self, out: &mut dyn Write) -> io::Result<()> {
        match self.kind {
            Kind::Empty => Ok(()),
            Kind::Bytes(bytes) => out.write_all(&bytes),
            Kind::Reader { mut reader, .. } => io::copy(&mut reader, out).map(|_| ()),
            Kind::Writer { write_fn, .. } => write_fn(out),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Empty => "Empty",
            Kind::Bytes(_) => "Bytes",
            Kind::Reader { .. } => "Reader",
            Kind::Writer { .. } => "Writer",
        };
        f.debug_struct("Body").field("kind", &kind).field("payload_size", &self.payload_size()).finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self { kind: Kind::Bytes(bytes) }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

/// Request body handed to a request handler.
///
/// Reads block on the worker thread until the I/O thread delivered more of
/// the body, see [`SharedInputBuffer`](crate::buffer::SharedInputBuffer).
#[derive(Debug)]
pub struct RequestBody {
    payload_size: PayloadSize,
    stream: Option<ContentInputStream>,
}

impl RequestBody {
    pub fn empty() -> Self {
        Self { payload_size: PayloadSize::Empty, stream: None }
    }

    pub(crate) fn new(payload_size: PayloadSize, stream: ContentInputStream) -> Self {
        if payload_size.is_empty() {
            return Self::empty();
        }
        Self { payload_size, stream: Some(stream) }
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_none()
    }

    /// Reads the rest of the body into memory.
    pub fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        let mut content = Vec::new();
        self.read_to_end(&mut content)?;
        Ok(content.into())
    }
}

impl Read for RequestBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Some(stream) => stream.read(buf),
            None => Ok(0),
        }
    }
}
