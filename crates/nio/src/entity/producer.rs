use crate::codec::ContentEncoder;
use crate::connection::IoControl;
use crate::entity::ProducingEntity;
use crate::protocol::{PayloadSize, SendError};
use bytes::{Buf, Bytes};

/// Produces a body from bytes held in memory.
#[derive(Debug, Clone)]
pub struct BytesProducer {
    content: Bytes,
    chunked: bool,
}

impl BytesProducer {
    /// A length delimited body.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self { content: content.into(), chunked: false }
    }

    /// A body sent with chunked transfer coding.
    pub fn chunked(content: impl Into<Bytes>) -> Self {
        Self { content: content.into(), chunked: true }
    }

    pub fn remaining(&self) -> usize {
        self.content.len()
    }
}

impl ProducingEntity for BytesProducer {
    fn payload_size(&self) -> PayloadSize {
        if self.chunked { PayloadSize::Chunked } else { PayloadSize::new_length(self.content.len() as u64) }
    }

    fn produce_content(&mut self, encoder: &mut dyn ContentEncoder, _control: &dyn IoControl) -> Result<(), SendError> {
        while !self.content.is_empty() {
            let n = encoder.write(&self.content)?;
            if n == 0 {
                return Ok(());
            }
            self.content.advance(n);
        }

        if !encoder.is_completed() {
            encoder.complete()?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.content.clear();
    }
}
