use crate::buffer::{SharedInputBuffer, SharedOutputBuffer};
use crate::connection::{HttpContext, IoControl};
use crate::protocol::ResponseHead;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

/// Input half of a server exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerInputState {
    Ready,
    RequestReceived,
    RequestBodyStream,
    RequestBodyDone,
    Shutdown,
}

/// Output half of a server exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOutputState {
    Ready,
    ResponseSent,
    ResponseBodyStream,
    ResponseDone,
    Shutdown,
}

/// Exchange record guarded by the connection monitor.
#[derive(Debug)]
pub struct ServerExchange {
    pub input_state: ServerInputState,
    pub output_state: ServerOutputState,
    /// Head staged by the worker, submitted by the I/O thread.
    pub response: Option<ResponseHead>,
    /// Whether a body follows the staged head.
    pub response_has_body: bool,
    /// The expectation verifier refused the request body.
    pub expectation_failed: bool,
    /// A worker owns the output half, from leaving the ordering guard until
    /// its response went out completely.
    pub output_claimed: bool,
}

impl ServerExchange {
    fn new() -> Self {
        Self {
            input_state: ServerInputState::Ready,
            output_state: ServerOutputState::Ready,
            response: None,
            response_has_body: false,
            expectation_failed: false,
            output_claimed: false,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.input_state == ServerInputState::Shutdown || self.output_state == ServerOutputState::Shutdown
    }
}

/// Per connection state of the throttling server.
///
/// Shared by the I/O thread and at most one busy worker. The exchange
/// record is only touched under the monitor; buffer calls happen outside
/// it or with the monitor taken first.
#[derive(Debug)]
pub struct ServerConnState {
    exchange: Mutex<ServerExchange>,
    cond: Condvar,
    input: Arc<SharedInputBuffer>,
    output: Arc<SharedOutputBuffer>,
    context: Mutex<HttpContext>,
}

impl ServerConnState {
    pub fn new(buffer_capacity: usize, control: Weak<dyn IoControl>) -> Self {
        Self {
            exchange: Mutex::new(ServerExchange::new()),
            cond: Condvar::new(),
            input: Arc::new(SharedInputBuffer::new(buffer_capacity, Weak::clone(&control))),
            output: Arc::new(SharedOutputBuffer::new(buffer_capacity, control)),
            context: Mutex::new(HttpContext::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ServerExchange> {
        self.exchange.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while `condition` holds, waking on every state change.
    pub fn wait_while<'a, F>(&self, guard: MutexGuard<'a, ServerExchange>, condition: F) -> MutexGuard<'a, ServerExchange>
    where
        F: FnMut(&mut ServerExchange) -> bool,
    {
        self.cond.wait_while(guard, condition).unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    pub fn input_buffer(&self) -> &Arc<SharedInputBuffer> {
        &self.input
    }

    pub fn output_buffer(&self) -> &Arc<SharedOutputBuffer> {
        &self.output
    }

    pub fn context(&self) -> MutexGuard<'_, HttpContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().is_shutdown()
    }

    /// Returns the input half to `Ready` for the next request.
    pub fn reset_input(&self) {
        let mut exchange = self.lock();
        if exchange.is_shutdown() {
            return;
        }
        exchange.input_state = ServerInputState::Ready;
        self.input.reset();
        self.cond.notify_all();
    }

    /// Returns the output half to `Ready` after an interim response. The
    /// claiming worker keeps the output half.
    pub fn reset_output(&self) {
        self.reset_output_with(|_| {});
    }

    /// Returns the output half to `Ready` and hands it to the next worker.
    pub fn release_output(&self) {
        self.reset_output_with(|exchange| exchange.output_claimed = false);
    }

    fn reset_output_with<F: FnOnce(&mut ServerExchange)>(&self, release: F) {
        let mut exchange = self.lock();
        if exchange.is_shutdown() {
            return;
        }
        release(&mut exchange);
        exchange.output_state = ServerOutputState::Ready;
        exchange.response = None;
        exchange.response_has_body = false;
        self.output.reset();
        self.cond.notify_all();
    }

    /// Graceful teardown; blocked workers see end of stream or abort.
    pub fn close(&self) {
        self.terminate(|| {
            self.input.close();
            self.output.close();
        });
    }

    /// Hard teardown; every blocked worker aborts.
    pub fn shutdown(&self) {
        self.terminate(|| {
            self.input.shutdown();
            self.output.shutdown();
        });
    }

    fn terminate<F: FnOnce()>(&self, release_buffers: F) {
        let mut exchange = self.lock();
        exchange.input_state = ServerInputState::Shutdown;
        exchange.output_state = ServerOutputState::Shutdown;
        exchange.response = None;
        release_buffers();
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn state() -> Arc<ServerConnState> {
        let control: Weak<dyn IoControl> = Weak::<NoControl>::new();
        Arc::new(ServerConnState::new(64, control))
    }

    struct NoControl;

    impl IoControl for NoControl {
        fn request_input(&self) {}
        fn suspend_input(&self) {}
        fn request_output(&self) {}
        fn suspend_output(&self) {}
        fn shutdown(&self) {}
    }

    #[test]
    fn shutdown_wakes_monitor_waiter() {
        let state = state();
        state.lock().output_state = ServerOutputState::ResponseSent;

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let exchange = state.lock();
                let exchange = state.wait_while(exchange, |e| e.output_state == ServerOutputState::ResponseSent);
                exchange.output_state
            })
        };

        thread::sleep(Duration::from_millis(10));
        state.shutdown();
        assert_eq!(waiter.join().unwrap(), ServerOutputState::Shutdown);
        assert!(state.output_buffer().is_shutdown());
    }

    #[test]
    fn reset_is_ignored_after_close() {
        let state = state();
        state.close();
        state.reset_output();
        state.reset_input();

        let exchange = state.lock();
        assert_eq!(exchange.output_state, ServerOutputState::Shutdown);
        assert_eq!(exchange.input_state, ServerInputState::Shutdown);
    }

    #[test]
    fn reset_output_clears_staged_response() {
        let state = state();
        {
            let mut exchange = state.lock();
            exchange.output_state = ServerOutputState::ResponseDone;
            exchange.response = Some(ResponseHead::new(()));
            exchange.response_has_body = true;
        }
        state.output_buffer().write(b"abc").unwrap();

        state.reset_output();
        let exchange = state.lock();
        assert_eq!(exchange.output_state, ServerOutputState::Ready);
        assert!(exchange.response.is_none());
        assert!(state.output_buffer().is_empty());
    }

    #[test]
    fn only_release_hands_over_the_output() {
        let state = state();
        state.lock().output_claimed = true;

        state.reset_output();
        assert!(state.lock().output_claimed);

        state.release_output();
        let exchange = state.lock();
        assert!(!exchange.output_claimed);
        assert_eq!(exchange.output_state, ServerOutputState::Ready);
    }
}
