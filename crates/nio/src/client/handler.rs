use crate::client::RequestExecutionHandler;
use crate::codec::{ContentDecoder, ContentEncoder, apply_payload_size, payload_size};
use crate::config::ExchangeConfig;
use crate::connection::{
    ClientConnState, ClientConnection, ClientEventHandler, ClientInputState, ClientOutputState, ConnectionReuseStrategy,
    DefaultConnectionReuseStrategy, EventListener, HttpContext, LoggingEventListener,
};
use crate::entity::SkipConsumer;
use crate::protocol::request::{expects_continue, into_head};
use crate::protocol::{HttpError, ResponseHead, can_response_have_body};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Drives client exchanges on the I/O thread.
///
/// One request is in flight per connection. A request announcing a body
/// together with `Expect: 100-continue` holds the body back until the
/// server answers `100 Continue` or the continue wait times out; a final
/// response arriving before the body was fully written cancels the body and
/// retires the connection after the exchange.
pub struct ClientExchangeHandler<H> {
    exec_handler: H,
    config: ExchangeConfig,
    reuse_strategy: Arc<dyn ConnectionReuseStrategy>,
    listener: Arc<dyn EventListener>,
}

impl<H: RequestExecutionHandler> ClientExchangeHandler<H> {
    pub fn new(exec_handler: H, config: ExchangeConfig) -> Self {
        Self {
            exec_handler,
            config,
            reuse_strategy: Arc::new(DefaultConnectionReuseStrategy),
            listener: Arc::new(LoggingEventListener),
        }
    }

    pub fn with_reuse_strategy(mut self, reuse_strategy: Arc<dyn ConnectionReuseStrategy>) -> Self {
        self.reuse_strategy = reuse_strategy;
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn exec_handler(&self) -> &H {
        &self.exec_handler
    }

    fn submit_next(&self, conn: &dyn ClientConnection, state: &mut ClientConnState) -> Result<(), HttpError> {
        let Some(request) = self.exec_handler.submit_request(state.context_mut()) else {
            trace!("no request to submit, suspend output");
            conn.suspend_output();
            return Ok(());
        };

        let (mut head, entity) = into_head(request);
        let entity = entity.filter(|entity| !entity.payload_size().is_empty());
        match &entity {
            Some(entity) => apply_payload_size(head.headers_mut(), entity.payload_size()),
            None => {
                head.headers_mut().remove(CONTENT_LENGTH);
                head.headers_mut().remove(TRANSFER_ENCODING);
            }
        }

        conn.submit_request(&head)?;
        debug!(method = %head.method(), uri = %head.uri(), "request submitted");
        state.set_output_state(ClientOutputState::RequestSent);

        match entity {
            Some(entity) => {
                let wait_for_continue = expects_continue(&head);
                state.set_producing(entity);
                if wait_for_continue {
                    state.save_timeout(conn.socket_timeout());
                    conn.set_socket_timeout(self.config.wait_for_continue());
                    state.set_output_state(ClientOutputState::ExpectContinue);
                    conn.suspend_output();
                    trace!("waiting for 100 continue");
                } else {
                    state.set_output_state(ClientOutputState::RequestBodyStream);
                    conn.request_output();
                }
            }
            None => state.set_output_state(ClientOutputState::RequestBodyDone),
        }

        state.set_request(head);
        Ok(())
    }

    /// Resumes the body held back for `100 Continue`.
    fn continue_request(&self, conn: &dyn ClientConnection, state: &mut ClientConnState) {
        if let Some(timeout) = state.take_saved_timeout() {
            conn.set_socket_timeout(timeout);
        }
        state.set_output_state(ClientOutputState::RequestBodyStream);
        conn.request_output();
    }

    /// Abandons the request body, it is never completed on the wire.
    fn cancel_request(&self, conn: &dyn ClientConnection, state: &mut ClientConnState) {
        if let Some(timeout) = state.take_saved_timeout() {
            conn.set_socket_timeout(timeout);
        }
        conn.reset_output();
        state.release_producing();
        state.set_output_state(ClientOutputState::RequestBodyDone);
    }

    fn process_response(&self, conn: &dyn ClientConnection, state: &mut ClientConnState) {
        let Some(head) = state.take_response() else {
            return;
        };

        // an invalid connection is retired whatever the reuse policy says
        let keep_alive = state.is_valid() && self.reuse_strategy.keep_alive(&head, conn);
        let (parts, ()) = head.into_parts();
        let response = Response::from_parts(parts, state.take_consuming());
        debug!(status = %response.status(), keep_alive, "response completed");

        self.exec_handler.handle_response(response, state.context_mut());
        state.reset();

        if !keep_alive {
            conn.close();
        }
        if conn.is_open() {
            conn.request_output();
        }
    }

    /// Reports the exchange in flight, if any, as failed.
    fn fail_exchange(&self, state: &mut ClientConnState, error: &HttpError) {
        if state.is_active() {
            self.exec_handler.failed(error, state.context_mut());
            state.reset();
        }
    }

    fn handle_error(&self, conn: &dyn ClientConnection, state: &mut ClientConnState, error: HttpError) {
        if error.is_transport() {
            conn.shutdown();
            self.listener.fatal_io_error(&error, conn);
        } else {
            conn.close();
            self.listener.fatal_protocol_error(&error, conn);
        }
        self.fail_exchange(state, &error);
    }

    fn final_response(&self, conn: &dyn ClientConnection, state: &mut ClientConnState, head: ResponseHead) -> Result<(), HttpError> {
        if state.output_state() == ClientOutputState::Ready || state.input_state() != ClientInputState::Ready {
            return Err(HttpError::illegal_state(format!("unexpected response {}", head.status())));
        }

        match state.output_state() {
            ClientOutputState::ExpectContinue => {
                trace!(status = %head.status(), "final response while waiting for continue, cancel request body");
                self.cancel_request(conn, state);
                state.invalidate();
            }
            ClientOutputState::RequestBodyStream => {
                trace!(status = %head.status(), "early response, cancel request body");
                self.cancel_request(conn, state);
                state.invalidate();
                conn.suspend_output();
            }
            _ => {}
        }

        let method = state.request().map_or(Method::GET, |request| request.method().clone());
        let has_body = can_response_have_body(&method, head.status()) && !payload_size(head.headers())?.is_empty();

        state.set_input_state(ClientInputState::ResponseReceived);
        if has_body {
            let consumer = self
                .exec_handler
                .response_entity(&head, state.context_mut())
                .unwrap_or_else(|| Box::new(SkipConsumer::new()));
            state.set_consuming(consumer);
            state.set_response(head);
            state.set_input_state(ClientInputState::ResponseBodyStream);
        } else {
            state.set_response(head);
            state.set_input_state(ClientInputState::ResponseBodyDone);
            self.process_response(conn, state);
        }
        Ok(())
    }
}

impl<H: RequestExecutionHandler> ClientEventHandler for ClientExchangeHandler<H> {
    type Session = ClientConnState;

    fn connected(&self, conn: &dyn ClientConnection) -> Self::Session {
        let mut context = HttpContext::new();
        self.exec_handler.initialize_context(&mut context);
        self.listener.connection_open(conn);

        let mut state = ClientConnState::new(context);
        self.request_ready(conn, &mut state);
        state
    }

    fn request_ready(&self, conn: &dyn ClientConnection, state: &mut Self::Session) {
        if state.is_active() || !state.is_valid() || conn.is_request_submitted() {
            return;
        }

        if let Err(e) = self.submit_next(conn, state) {
            self.handle_error(conn, state, e);
        }
    }

    fn output_ready(&self, conn: &dyn ClientConnection, state: &mut Self::Session, encoder: &mut dyn ContentEncoder) {
        if state.output_state() == ClientOutputState::ExpectContinue {
            conn.suspend_output();
            return;
        }
        if state.output_state() != ClientOutputState::RequestBodyStream {
            return;
        }

        let Some(entity) = state.producing() else {
            return;
        };
        if let Err(e) = entity.produce_content(encoder, conn) {
            self.handle_error(conn, state, e.into());
            return;
        }

        if encoder.is_completed() {
            trace!("request body done");
            state.release_producing();
            state.set_output_state(ClientOutputState::RequestBodyDone);
        }
    }

    fn response_received(&self, conn: &dyn ClientConnection, state: &mut Self::Session, head: ResponseHead) {
        let status = head.status();
        if status.is_informational() {
            if status == StatusCode::SWITCHING_PROTOCOLS {
                self.handle_error(conn, state, HttpError::illegal_state("protocol upgrade is not supported"));
            } else if status == StatusCode::CONTINUE && state.output_state() == ClientOutputState::ExpectContinue {
                trace!("100 continue received");
                self.continue_request(conn, state);
            } else {
                trace!(%status, "ignore informational response");
            }
            return;
        }

        if let Err(e) = self.final_response(conn, state, head) {
            self.handle_error(conn, state, e);
        }
    }

    fn input_ready(&self, conn: &dyn ClientConnection, state: &mut Self::Session, decoder: &mut dyn ContentDecoder) {
        if state.input_state() != ClientInputState::ResponseBodyStream {
            return;
        }

        let Some(entity) = state.consuming() else {
            return;
        };
        if let Err(e) = entity.consume_content(decoder, conn) {
            self.handle_error(conn, state, e.into());
            return;
        }

        if decoder.is_completed() {
            state.set_input_state(ClientInputState::ResponseBodyDone);
            self.process_response(conn, state);
        }
    }

    fn exception(&self, conn: &dyn ClientConnection, state: &mut Self::Session, error: HttpError) {
        self.handle_error(conn, state, error);
    }

    fn timeout(&self, conn: &dyn ClientConnection, state: &mut Self::Session) {
        if state.output_state() == ClientOutputState::ExpectContinue {
            // the server is assumed to accept the body
            trace!("continue wait timed out, send request body");
            self.continue_request(conn, state);
            return;
        }

        self.listener.connection_timeout(conn);
        self.fail_exchange(state, &HttpError::Timeout);
        conn.close();
    }

    fn closed(&self, conn: &dyn ClientConnection, state: &mut Self::Session) {
        if state.is_active() {
            warn!(output = ?state.output_state(), input = ?state.input_state(), "connection closed with exchange in flight");
        }
        self.fail_exchange(state, &HttpError::ConnectionClosed);
        state.reset();
        self.exec_handler.finalize_context(state.context_mut());
        self.listener.connection_closed(conn);
    }
}

impl<H> std::fmt::Debug for ClientExchangeHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientExchangeHandler").field("config", &self.config).finish_non_exhaustive()
    }
}
