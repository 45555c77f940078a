use crate::codec::ContentDecoder;
use crate::connection::IoControl;
use crate::entity::ConsumingEntity;
use crate::protocol::ParseError;
use bytes::{Bytes, BytesMut};

const READ_SIZE: usize = 8 * 1024;

/// Collects the whole body in memory.
#[derive(Debug, Default)]
pub struct BufferingConsumer {
    content: BytesMut,
    limit: Option<usize>,
}

impl BufferingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the exchange once the body grows beyond `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { content: BytesMut::new(), limit: Some(limit) }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl ConsumingEntity for BufferingConsumer {
    fn consume_content(&mut self, decoder: &mut dyn ContentDecoder, _control: &dyn IoControl) -> Result<(), ParseError> {
        loop {
            let n = decoder.read(&mut self.content, READ_SIZE)?;
            if let Some(limit) = self.limit
                && self.content.len() > limit
            {
                return Err(ParseError::invalid_body(format!("body exceeds limit of {limit} bytes")));
            }
            if n == 0 || decoder.is_completed() {
                return Ok(());
            }
        }
    }

    fn into_bytes(self: Box<Self>) -> Option<Bytes> {
        Some(self.content.freeze())
    }
}

/// Reads and discards the body, keeping the connection usable.
#[derive(Debug, Default)]
pub struct SkipConsumer {
    scratch: BytesMut,
    skipped: u64,
}

impl SkipConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl ConsumingEntity for SkipConsumer {
    fn consume_content(&mut self, decoder: &mut dyn ContentDecoder, _control: &dyn IoControl) -> Result<(), ParseError> {
        loop {
            self.scratch.clear();
            let n = decoder.read(&mut self.scratch, READ_SIZE)?;
            self.skipped += n as u64;
            if n == 0 || decoder.is_completed() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PayloadDecoder, SessionDecoder};
    use crate::protocol::PayloadSize;

    struct NoControl;

    impl IoControl for NoControl {
        fn request_input(&self) {}
        fn suspend_input(&self) {}
        fn request_output(&self) {}
        fn suspend_output(&self) {}
        fn shutdown(&self) {}
    }

    #[test]
    fn buffering_collects_body() {
        let mut framing = PayloadDecoder::from(PayloadSize::Chunked);
        let mut session = BytesMut::from(&b"3\r\nfoo\r\n"[..]);
        let mut consumer = BufferingConsumer::new();

        consumer.consume_content(&mut SessionDecoder::new(&mut framing, &mut session), &NoControl).unwrap();
        session.extend_from_slice(b"3\r\nbar\r\n0\r\n\r\n");
        consumer.consume_content(&mut SessionDecoder::new(&mut framing, &mut session), &NoControl).unwrap();

        assert!(framing.is_finish());
        let content = Box::new(consumer).into_bytes().unwrap();
        assert_eq!(content.as_ref(), b"foobar");
    }

    #[test]
    fn buffering_enforces_limit() {
        let mut framing = PayloadDecoder::from(PayloadSize::Length(5));
        let mut session = BytesMut::from(&b"12345"[..]);
        let mut consumer = BufferingConsumer::with_limit(4);

        let result = consumer.consume_content(&mut SessionDecoder::new(&mut framing, &mut session), &NoControl);
        assert!(matches!(result, Err(ParseError::InvalidBody { .. })));
    }

    #[test]
    fn skip_discards_body() {
        let mut framing = PayloadDecoder::from(PayloadSize::Length(20_000));
        let mut session = BytesMut::from(&[1u8; 20_000][..]);
        let mut consumer = SkipConsumer::new();

        consumer.consume_content(&mut SessionDecoder::new(&mut framing, &mut session), &NoControl).unwrap();
        assert_eq!(consumer.skipped(), 20_000);
        assert!(framing.is_finish());
        assert!(Box::new(consumer).into_bytes().is_none());
    }
}
