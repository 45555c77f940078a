use bytes::BytesMut;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub(crate) struct ContentState {
    pub(crate) buf: BytesMut,
    /// The producing side has delivered the whole body.
    pub(crate) end_of_stream: bool,
    /// The connection went away; content left in the buffer may still be
    /// read but nothing new arrives.
    pub(crate) closed: bool,
    /// Hard stop, every blocked call fails.
    pub(crate) shutdown: bool,
}

impl ContentState {
    pub(crate) fn is_terminated(&self) -> bool {
        self.closed || self.shutdown
    }
}

/// Bounded byte buffer shared by the I/O thread and one worker thread.
///
/// The buffer never holds more than `capacity` bytes: the side filling it
/// either blocks (worker) or stops early (I/O thread) once it is full. The
/// backing allocation is reserved once and reused, so memory held for a
/// body stays at `capacity` whatever the body size.
#[derive(Debug)]
pub struct SharedContentBuffer {
    capacity: usize,
    state: Mutex<ContentState>,
    cond: Condvar,
}

impl SharedContentBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let state = ContentState { buf: BytesMut::with_capacity(capacity), end_of_stream: false, closed: false, shutdown: false };
        Self { capacity, state: Mutex::new(state), cond: Condvar::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    /// Room left before the buffer is full.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.lock().buf.len())
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.lock().end_of_stream
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Discards content and clears end of stream for the next exchange.
    /// A closed or shut down buffer stays that way.
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.is_terminated() {
            return;
        }
        state.buf.clear();
        state.end_of_stream = false;
        self.cond.notify_all();
    }

    /// Graceful teardown: readers drain what is left and then see end of
    /// stream, writers fail.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    /// Hard teardown: content is dropped and every blocked call fails.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.buf.clear();
        self.cond.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, ContentState>) -> MutexGuard<'a, ContentState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }
}
