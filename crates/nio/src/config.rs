//! Tunables of the exchange handlers.

use std::time::Duration;

/// Default capacity of each shared content buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 20 * 1024;

/// Default time a client waits for `100 Continue` before sending the body.
pub const DEFAULT_WAIT_FOR_CONTINUE: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    buffer_capacity: usize,
    wait_for_continue: Duration,
}

impl ExchangeConfig {
    pub fn new() -> Self {
        Self { buffer_capacity: DEFAULT_BUFFER_CAPACITY, wait_for_continue: DEFAULT_WAIT_FOR_CONTINUE }
    }

    /// Bytes each shared content buffer holds at most; bounds the memory a
    /// server connection spends on bodies.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub fn with_wait_for_continue(mut self, timeout: Duration) -> Self {
        self.wait_for_continue = timeout;
        self
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn wait_for_continue(&self) -> Duration {
        self.wait_for_continue
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::new()
    }
}
