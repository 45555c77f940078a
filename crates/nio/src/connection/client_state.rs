use crate::connection::HttpContext;
use crate::entity::{ConsumingEntity, ProducingEntity};
use crate::protocol::{RequestHead, ResponseHead};
use std::time::Duration;

/// Output half of a client exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutputState {
    /// No request in flight.
    Ready,
    /// The head was submitted.
    RequestSent,
    /// Body held back until the server sent `100 Continue` or the wait
    /// timed out.
    ExpectContinue,
    RequestBodyStream,
    RequestBodyDone,
}

/// Input half of a client exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientInputState {
    Ready,
    ResponseReceived,
    ResponseBodyStream,
    ResponseBodyDone,
}

/// Per connection state of a client.
pub struct ClientConnState {
    output_state: ClientOutputState,
    input_state: ClientInputState,
    request: Option<RequestHead>,
    response: Option<ResponseHead>,
    producing: Option<Box<dyn ProducingEntity>>,
    consuming: Option<Box<dyn ConsumingEntity>>,
    valid: bool,
    saved_timeout: Option<Duration>,
    context: HttpContext,
}

impl ClientConnState {
    pub fn new(context: HttpContext) -> Self {
        Self {
            output_state: ClientOutputState::Ready,
            input_state: ClientInputState::Ready,
            request: None,
            response: None,
            producing: None,
            consuming: None,
            valid: true,
            saved_timeout: None,
            context,
        }
    }

    pub fn output_state(&self) -> ClientOutputState {
        self.output_state
    }

    pub fn set_output_state(&mut self, state: ClientOutputState) {
        self.output_state = state;
    }

    pub fn input_state(&self) -> ClientInputState {
        self.input_state
    }

    pub fn set_input_state(&mut self, state: ClientInputState) {
        self.input_state = state;
    }

    pub fn request(&self) -> Option<&RequestHead> {
        self.request.as_ref()
    }

    pub fn set_request(&mut self, request: RequestHead) {
        self.request = Some(request);
    }

    pub fn response(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: ResponseHead) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<ResponseHead> {
        self.response.take()
    }

    pub fn producing(&mut self) -> Option<&mut (dyn ProducingEntity + 'static)> {
        self.producing.as_deref_mut()
    }

    pub fn set_producing(&mut self, entity: Box<dyn ProducingEntity>) {
        self.producing = Some(entity);
    }

    /// Lets go of the request body, finishing it.
    pub fn release_producing(&mut self) {
        if let Some(mut entity) = self.producing.take() {
            entity.finish();
        }
    }

    pub fn consuming(&mut self) -> Option<&mut (dyn ConsumingEntity + 'static)> {
        self.consuming.as_deref_mut()
    }

    pub fn set_consuming(&mut self, entity: Box<dyn ConsumingEntity>) {
        self.consuming = Some(entity);
    }

    /// Hands the response body over to the application.
    pub fn take_consuming(&mut self) -> Option<Box<dyn ConsumingEntity>> {
        self.consuming.take()
    }

    /// True while an exchange is in flight on either half.
    pub fn is_active(&self) -> bool {
        self.output_state != ClientOutputState::Ready || self.input_state != ClientInputState::Ready
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The peer's idea of the stream position may differ from ours; the
    /// connection must be closed once the exchange is over.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Remembers the socket timeout to restore after the continue wait.
    pub fn save_timeout(&mut self, timeout: Duration) {
        self.saved_timeout = Some(timeout);
    }

    /// Yields the saved timeout once; later calls return `None`.
    pub fn take_saved_timeout(&mut self) -> Option<Duration> {
        self.saved_timeout.take()
    }

    pub fn context(&self) -> &HttpContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut HttpContext {
        &mut self.context
    }

    pub fn reset_input(&mut self) {
        self.response = None;
        if let Some(mut entity) = self.consuming.take() {
            entity.finish();
        }
        self.input_state = ClientInputState::Ready;
    }

    pub fn reset_output(&mut self) {
        self.request = None;
        self.release_producing();
        self.saved_timeout = None;
        self.output_state = ClientOutputState::Ready;
    }

    pub fn reset(&mut self) {
        self.reset_input();
        self.reset_output();
    }
}

impl std::fmt::Debug for ClientConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnState")
            .field("output_state", &self.output_state)
            .field("input_state", &self.input_state)
            .field("request", &self.request.as_ref().map(|r| (r.method().clone(), r.uri().clone())))
            .field("response", &self.response.as_ref().map(ResponseHead::status))
            .field("producing", &self.producing.is_some())
            .field("consuming", &self.consuming.is_some())
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}
