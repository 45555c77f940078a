use crate::buffer::{ContentInputStream, ContentOutputStream};
use crate::codec::{ContentDecoder, ContentEncoder, apply_payload_size, payload_size};
use crate::config::ExchangeConfig;
use crate::connection::{
    ConnectionReuseStrategy, DefaultConnectionReuseStrategy, EventListener, IoControl, LoggingEventListener, ServerConnState,
    ServerConnection, ServerEventHandler, ServerExchange, ServerInputState, ServerOutputState,
};
use crate::entity::{Body, RequestBody};
use crate::protocol::request::expects_continue;
use crate::protocol::response::into_head;
use crate::protocol::{
    BufferError, HandlerError, HttpError, ParseError, PayloadSize, RequestHead, ResponseHead, can_response_have_body, is_aborted,
};
use crate::ensure;
use crate::server::{Executor, ExpectationVerifier, RequestHandler};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderValue, Method, Response, StatusCode, Version};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Server exchange handler that runs request handlers on worker threads.
///
/// The I/O thread only moves bytes between the connection and two bounded
/// buffers per connection; the worker reads the request body from one and
/// writes the response body into the other, blocking whenever the I/O
/// thread falls behind. Memory spent on bodies is therefore bounded by
/// twice the configured buffer capacity per connection, whatever the size
/// of the entities.
///
/// Requests read ahead on a connection are answered in order: a worker
/// waits until the response of the previous exchange went out completely.
pub struct ThrottlingServerHandler<H> {
    handler: Arc<H>,
    verifier: Option<Arc<dyn ExpectationVerifier>>,
    executor: Arc<dyn Executor>,
    config: ExchangeConfig,
    reuse_strategy: Arc<dyn ConnectionReuseStrategy>,
    listener: Arc<dyn EventListener>,
}

impl<H: RequestHandler + 'static> ThrottlingServerHandler<H> {
    pub fn new(handler: H, executor: Arc<dyn Executor>, config: ExchangeConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            verifier: None,
            executor,
            config,
            reuse_strategy: Arc::new(DefaultConnectionReuseStrategy),
            listener: Arc::new(LoggingEventListener),
        }
    }

    pub fn with_expectation_verifier(mut self, verifier: Arc<dyn ExpectationVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_reuse_strategy(mut self, reuse_strategy: Arc<dyn ConnectionReuseStrategy>) -> Self {
        self.reuse_strategy = reuse_strategy;
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn handle_error(&self, conn: &Arc<dyn ServerConnection>, state: &ServerConnState, error: HttpError) {
        if error.is_transport() {
            state.shutdown();
            conn.shutdown();
            self.listener.fatal_io_error(&error, &**conn);
            return;
        }

        {
            let exchange = state.lock();
            if exchange.output_state == ServerOutputState::Ready && !conn.is_response_submitted() {
                let head = protocol_error_head(error_status(&error));
                if let Err(e) = conn.submit_response(&head) {
                    debug!(cause = %e, "failed to send error response");
                }
            }
        }
        state.close();
        conn.close();
        self.listener.fatal_protocol_error(&error, &**conn);
    }

    fn keep_alive(&self, conn: &Arc<dyn ServerConnection>, head: &ResponseHead) -> bool {
        self.reuse_strategy.keep_alive(head, &**conn)
    }
}

impl<H: RequestHandler + 'static> ServerEventHandler for ThrottlingServerHandler<H> {
    type Session = Arc<ServerConnState>;

    fn connected(&self, conn: &Arc<dyn ServerConnection>) -> Self::Session {
        let control: Arc<dyn IoControl> = Arc::<dyn ServerConnection>::clone(conn);
        self.listener.connection_open(&**conn);
        Arc::new(ServerConnState::new(self.config.buffer_capacity(), Arc::downgrade(&control)))
    }

    fn request_received(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session, head: RequestHead) {
        let payload = match payload_size(head.headers()) {
            Ok(payload) => payload,
            Err(e) => {
                self.handle_error(conn, state, e.into());
                return;
            }
        };

        {
            let mut exchange = state.lock();
            if exchange.is_shutdown() {
                return;
            }
            if exchange.input_state != ServerInputState::Ready {
                drop(exchange);
                let error = ParseError::invalid_body("request received before the previous request body was read");
                self.handle_error(conn, state, error.into());
                return;
            }

            if payload.is_empty() {
                conn.suspend_input();
                exchange.input_state = ServerInputState::RequestBodyDone;
            } else {
                exchange.input_state = ServerInputState::RequestReceived;
            }
        }

        debug!(method = %head.method(), uri = %head.uri(), ?payload, "request received");
        let worker = Worker {
            handler: Arc::clone(&self.handler),
            verifier: self.verifier.clone(),
            conn: Arc::clone(conn),
            state: Arc::clone(state),
        };
        self.executor.execute(Box::new(move || worker.run(head, payload)));
    }

    fn input_ready(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session, decoder: &mut dyn ContentDecoder) {
        let mut exchange = state.lock();
        if exchange.is_shutdown() {
            return;
        }
        if !matches!(exchange.input_state, ServerInputState::RequestReceived | ServerInputState::RequestBodyStream) {
            conn.suspend_input();
            return;
        }

        if let Err(e) = state.input_buffer().consume_content(decoder) {
            drop(exchange);
            self.handle_error(conn, state, e.into());
            return;
        }

        if decoder.is_completed() {
            trace!("request body done");
            exchange.input_state = ServerInputState::RequestBodyDone;
            conn.suspend_input();
        } else {
            exchange.input_state = ServerInputState::RequestBodyStream;
        }
        state.notify_all();
    }

    fn response_ready(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session) {
        if conn.is_response_submitted() {
            return;
        }

        let mut exchange = state.lock();
        if exchange.is_shutdown() {
            return;
        }
        if exchange.output_state != ServerOutputState::Ready || exchange.response.is_none() {
            conn.suspend_output();
            return;
        }

        if exchange.expectation_failed {
            // the client will not send the body it announced
            conn.reset_input();
            conn.request_input();
            exchange.expectation_failed = false;
        }

        let ServerExchange { response: Some(head), response_has_body, .. } = &*exchange else {
            return;
        };
        if let Err(e) = conn.submit_response(head) {
            drop(exchange);
            self.handle_error(conn, state, e);
            return;
        }

        trace!(status = %head.status(), body = *response_has_body, "response submitted");
        if head.status().is_informational() || *response_has_body {
            exchange.output_state = ServerOutputState::ResponseSent;
        } else {
            let keep_alive = self.keep_alive(conn, head);
            exchange.output_state = ServerOutputState::ResponseDone;
            if !keep_alive {
                conn.close();
            }
        }
        state.notify_all();
    }

    fn output_ready(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session, encoder: &mut dyn ContentEncoder) {
        let mut exchange = state.lock();
        if exchange.is_shutdown() {
            return;
        }
        if !matches!(exchange.output_state, ServerOutputState::ResponseSent | ServerOutputState::ResponseBodyStream) {
            return;
        }

        if let Err(e) = state.output_buffer().produce_content(encoder) {
            drop(exchange);
            self.handle_error(conn, state, e.into());
            return;
        }

        if encoder.is_completed() {
            trace!("response body done");
            exchange.output_state = ServerOutputState::ResponseDone;
            let keep_alive = exchange.response.as_ref().is_some_and(|head| self.keep_alive(conn, head));
            if !keep_alive {
                conn.close();
            }
        } else {
            exchange.output_state = ServerOutputState::ResponseBodyStream;
        }
        state.notify_all();
    }

    fn exception(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session, error: HttpError) {
        self.handle_error(conn, state, error);
    }

    fn timeout(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session) {
        self.listener.connection_timeout(&**conn);
        state.shutdown();
        conn.shutdown();
    }

    fn closed(&self, conn: &Arc<dyn ServerConnection>, state: &mut Self::Session) {
        state.close();
        self.listener.connection_closed(&**conn);
    }
}

impl<H> std::fmt::Debug for ThrottlingServerHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlingServerHandler")
            .field("config", &self.config)
            .field("verifier", &self.verifier.is_some())
            .finish_non_exhaustive()
    }
}

/// One exchange, processed on a worker thread.
struct Worker<H> {
    handler: Arc<H>,
    verifier: Option<Arc<dyn ExpectationVerifier>>,
    conn: Arc<dyn ServerConnection>,
    state: Arc<ServerConnState>,
}

impl<H: RequestHandler> Worker<H> {
    fn run(self, request: RequestHead, payload: PayloadSize) {
        if let Err(e) = self.serve(request, payload) {
            debug!(cause = %e, "exchange abandoned");
        }
    }

    fn serve(&self, request: RequestHead, payload: PayloadSize) -> Result<(), BufferError> {
        // responses go out in request order
        self.claim_output()?;

        let method = request.method().clone();
        let version = response_version(request.version());

        let mut body_refused = false;
        let response = if !is_supported(request.version()) {
            error_response(&HandlerError::UnsupportedVersion(request.version()), version)
        } else if let Some(rejection) = self.handshake(&request, payload, version)? {
            body_refused = true;
            rejection
        } else {
            let body = RequestBody::new(payload, ContentInputStream::new(Arc::clone(self.state.input_buffer())));
            self.invoke(request.map(|()| body), version)?
        };

        if !body_refused && !payload.is_empty() {
            let skipped = self.state.input_buffer().drain()?;
            if skipped > 0 {
                trace!(skipped, "discarded unread request content");
            }
        }
        self.state.reset_input();
        if !body_refused {
            self.conn.request_input();
        }

        self.send(&method, response)
    }

    /// Answers `Expect: 100-continue`. Returns the response replacing the
    /// handler's when the expectation failed.
    fn handshake(&self, request: &RequestHead, payload: PayloadSize, version: Version) -> Result<Option<Response<Body>>, BufferError> {
        if payload.is_empty() || !expects_continue(request) {
            return Ok(None);
        }

        let mut interim = Response::new(());
        *interim.status_mut() = StatusCode::CONTINUE;
        *interim.version_mut() = version;

        if let Some(verifier) = &self.verifier {
            let verified = guarded(|| verifier.verify(request, &mut interim, &mut self.state.context()));
            if let Err(e) = verified {
                warn!(cause = %e, "expectation verifier failed");
                return Ok(Some(self.refuse_body(error_response(&e, version))));
            }
        }

        if !interim.status().is_informational() {
            debug!(status = %interim.status(), "expectation failed");
            let (parts, ()) = interim.into_parts();
            return Ok(Some(self.refuse_body(Response::from_parts(parts, Body::empty()))));
        }

        {
            let mut exchange = self.state.lock();
            if exchange.is_shutdown() {
                return Err(BufferError::Aborted);
            }
            exchange.response = Some(interim);
            exchange.response_has_body = false;
        }
        self.conn.request_output();
        self.await_output(|exchange| exchange.output_state == ServerOutputState::ResponseSent)?;
        self.state.reset_output();
        Ok(None)
    }

    fn refuse_body(&self, response: Response<Body>) -> Response<Body> {
        self.state.lock().expectation_failed = true;
        self.conn.suspend_input();
        response
    }

    fn invoke(&self, request: http::Request<RequestBody>, version: Version) -> Result<Response<Body>, BufferError> {
        let mut response = Response::new(Body::empty());
        *response.version_mut() = version;

        let outcome = guarded(|| self.handler.handle(request, &mut response, &mut self.state.context()));
        let outcome = outcome.and_then(|()| {
            if response.status().is_informational() {
                return Err(HandlerError::other(format!("{} is not a final status", response.status())));
            }
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(response),
            Err(HandlerError::Io { source }) if is_aborted(&source) => Err(BufferError::Aborted),
            Err(e) => {
                warn!(cause = %e, "request handler failed");
                Ok(error_response(&e, version))
            }
        }
    }

    /// Stages the head for the I/O thread, streams the body and waits until
    /// the whole response went out.
    fn send(&self, method: &Method, response: Response<Body>) -> Result<(), BufferError> {
        let (mut head, body) = into_head(response);
        let status = head.status();
        let has_body = can_response_have_body(method, status) && !body.is_empty();

        if can_response_have_body(method, status) {
            apply_payload_size(head.headers_mut(), body.payload_size());
        } else if status == StatusCode::NO_CONTENT {
            head.headers_mut().remove(CONTENT_LENGTH);
            head.headers_mut().remove(TRANSFER_ENCODING);
        } else if let Some(length) = body.payload_size().content_length()
            && !head.headers().contains_key(CONTENT_LENGTH)
        {
            // HEAD and 304 announce the size of the representation
            head.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        {
            let mut exchange = self.state.lock();
            if exchange.is_shutdown() {
                return Err(BufferError::Aborted);
            }
            exchange.response = Some(head);
            exchange.response_has_body = has_body;
        }
        self.conn.request_output();

        if has_body {
            let mut out = ContentOutputStream::new(Arc::clone(self.state.output_buffer()));
            match body.write_to(&mut out) {
                Ok(()) => {}
                Err(e) if is_aborted(&e) => return Err(BufferError::Aborted),
                Err(e) => {
                    // the head is out, the body can not be completed
                    error!(cause = %e, "failed to produce response body, shutdown connection");
                    self.state.shutdown();
                    self.conn.shutdown();
                    return Err(BufferError::Aborted);
                }
            }
            self.state.output_buffer().write_completed()?;
        }

        self.await_output(|exchange| exchange.output_state == ServerOutputState::ResponseDone)?;
        self.state.release_output();
        self.conn.request_output();
        Ok(())
    }

    /// Waits until the previous response went out, then takes the output
    /// half in the same critical section.
    fn claim_output(&self) -> Result<(), BufferError> {
        let exchange = self.state.lock();
        let mut exchange = self.state.wait_while(exchange, |exchange| {
            (exchange.output_claimed || exchange.output_state != ServerOutputState::Ready) && !exchange.is_shutdown()
        });
        ensure!(!exchange.is_shutdown(), BufferError::Aborted);
        exchange.output_claimed = true;
        Ok(())
    }

    fn await_output<F>(&self, done: F) -> Result<(), BufferError>
    where
        F: Fn(&ServerExchange) -> bool,
    {
        let exchange = self.state.lock();
        let exchange = self.state.wait_while(exchange, |exchange| !done(exchange) && !exchange.is_shutdown());
        if exchange.is_shutdown() { Err(BufferError::Aborted) } else { Ok(()) }
    }
}

fn guarded<F>(f: F) -> Result<(), HandlerError>
where
    F: FnOnce() -> Result<(), HandlerError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("request handler panicked");
        Err(HandlerError::other("request handler panicked"))
    })
}

fn is_supported(version: Version) -> bool {
    version >= Version::HTTP_10
}

fn response_version(version: Version) -> Version {
    if version >= Version::HTTP_10 && version <= Version::HTTP_11 { version } else { Version::HTTP_11 }
}

fn error_response(error: &HandlerError, version: Version) -> Response<Body> {
    let mut response = Response::new(Body::from(error.to_string()));
    *response.status_mut() = error.status_code();
    *response.version_mut() = version;
    if let Ok(value) = mime::TEXT_PLAIN_UTF_8.as_ref().parse::<HeaderValue>() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

fn error_status(error: &HttpError) -> StatusCode {
    match error {
        HttpError::RequestError { source } => source.status_code(),
        HttpError::ResponseError { .. } | HttpError::IllegalState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn protocol_error_head(status: StatusCode) -> ResponseHead {
    let mut head = Response::new(());
    *head.status_mut() = status;
    head.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(0u64));
    head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PayloadDecoder, PayloadEncoder, SessionDecoder, SessionEncoder};
    use crate::connection::{HttpConnection, HttpContext};
    use crate::server::{Task, make_handler};
    use bytes::BytesMut;
    use http::Request;
    use http::header::EXPECT;
    use std::io::Read;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct MockConn {
        events: Mutex<Vec<String>>,
        submitted: Mutex<Vec<ResponseHead>>,
        closed: AtomicBool,
    }

    impl MockConn {
        fn record(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn saw(&self, event: &str) -> bool {
            self.events.lock().unwrap().iter().any(|e| e == event)
        }

        fn submitted(&self) -> Vec<StatusCode> {
            self.submitted.lock().unwrap().iter().map(Response::status).collect()
        }
    }

    impl IoControl for MockConn {
        fn request_input(&self) {
            self.record("request_input");
        }
        fn suspend_input(&self) {
            self.record("suspend_input");
        }
        fn request_output(&self) {
            self.record("request_output");
        }
        fn suspend_output(&self) {
            self.record("suspend_output");
        }
        fn shutdown(&self) {
            self.record("shutdown");
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl HttpConnection for MockConn {
        fn reset_input(&self) {
            self.record("reset_input");
        }
        fn reset_output(&self) {
            self.record("reset_output");
        }
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
        fn close(&self) {
            self.record("close");
            self.closed.store(true, Ordering::SeqCst);
        }
        fn socket_timeout(&self) -> Duration {
            Duration::from_secs(30)
        }
        fn set_socket_timeout(&self, _timeout: Duration) {}
    }

    impl ServerConnection for MockConn {
        fn submit_response(&self, head: &ResponseHead) -> Result<(), HttpError> {
            let id = head.headers().get("x-id").and_then(|v| v.to_str().ok()).unwrap_or("-");
            self.record(format!("submit {} {id}", head.status().as_u16()));
            self.submitted.lock().unwrap().push(crate::protocol::response::copy_head(head));
            Ok(())
        }
        fn is_response_submitted(&self) -> bool {
            false
        }
    }

    /// Spawns every task on its own thread and keeps the join handles.
    #[derive(Clone, Default)]
    struct Threads(Arc<Mutex<Vec<JoinHandle<()>>>>);

    impl Threads {
        fn executor(&self) -> Arc<dyn Executor> {
            let threads = self.clone();
            Arc::new(move |task: Task| threads.0.lock().unwrap().push(thread::spawn(task)))
        }

        fn join(&self) {
            let handles: Vec<_> = self.0.lock().unwrap().drain(..).collect();
            for handle in handles {
                handle.join().unwrap();
            }
        }
    }

    fn setup<H: RequestHandler + 'static>(handler: H) -> (ThrottlingServerHandler<H>, Arc<MockConn>, Arc<dyn ServerConnection>, Threads) {
        let threads = Threads::default();
        let server = ThrottlingServerHandler::new(handler, threads.executor(), ExchangeConfig::default().with_buffer_capacity(16));
        let mock = Arc::new(MockConn::default());
        let conn: Arc<dyn ServerConnection> = Arc::clone(&mock) as Arc<dyn ServerConnection>;
        (server, mock, conn, threads)
    }

    fn eventually<F: FnMut() -> bool>(mut condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn get(id: &str) -> RequestHead {
        Request::get("/").header("x-id", id).body(()).unwrap()
    }

    fn echo_id(request: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext) -> Result<(), HandlerError> {
        if let Some(id) = request.headers().get("x-id") {
            response.headers_mut().insert("x-id", id.clone());
        }
        Ok(())
    }

    /// Drives the output side like a reactor would until the response went
    /// out; returns the body bytes.
    fn drain_response<H: RequestHandler + 'static>(
        server: &ThrottlingServerHandler<H>,
        conn: &Arc<dyn ServerConnection>,
        state: &mut Arc<ServerConnState>,
        framing: PayloadSize,
    ) -> Vec<u8> {
        let mut framing = PayloadEncoder::from(framing);
        let mut session = BytesMut::new();
        let mut content = Vec::new();
        eventually(|| {
            let mut encoder = SessionEncoder::new(&mut framing, &mut session, 8);
            server.output_ready(conn, state, &mut encoder);
            content.extend_from_slice(&session.split());
            framing.is_finish()
        });
        content
    }

    #[test]
    fn simple_exchange() {
        let handler = make_handler(|_: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
            *response.body_mut() = Body::from("hello world");
            Ok::<(), HandlerError>(())
        });
        let (server, mock, conn, threads) = setup(handler);
        let mut state = server.connected(&conn);

        server.request_received(&conn, &mut state, get("1"));
        assert!(mock.saw("suspend_input"));

        eventually(|| {
            server.response_ready(&conn, &mut state);
            !mock.submitted().is_empty()
        });
        let head = mock.submitted.lock().unwrap()[0].headers().clone();
        assert_eq!(head.get(CONTENT_LENGTH).unwrap(), "11");

        let content = drain_response(&server, &conn, &mut state, PayloadSize::Length(11));
        assert_eq!(content, b"hello world");

        eventually(|| state.lock().output_state == ServerOutputState::Ready);
        assert!(!mock.saw("close"));
        threads.join();
    }

    #[test]
    fn request_body_streams_through_bounded_buffer() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler = make_handler(move |mut request: Request<RequestBody>, _: &mut Response<Body>, _: &mut HttpContext| {
            let mut content = Vec::new();
            request.body_mut().read_to_end(&mut content)?;
            sink.lock().unwrap().extend_from_slice(&content);
            Ok::<(), HandlerError>(())
        });
        let (server, mock, conn, threads) = setup(handler);
        let mut state = server.connected(&conn);

        let payload: Vec<u8> = (0..100u8).collect();
        let head = Request::post("/").header(CONTENT_LENGTH, payload.len()).body(()).unwrap();
        server.request_received(&conn, &mut state, head);

        let mut framing = PayloadDecoder::from(PayloadSize::Length(100));
        let mut wire = BytesMut::from(&payload[..]);
        eventually(|| {
            let mut decoder = SessionDecoder::new(&mut framing, &mut wire);
            server.input_ready(&conn, &mut state, &mut decoder);
            assert!(state.input_buffer().len() <= 16);
            matches!(state.lock().input_state, ServerInputState::RequestBodyDone | ServerInputState::Ready)
        });

        eventually(|| {
            server.response_ready(&conn, &mut state);
            !mock.submitted().is_empty()
        });
        eventually(|| state.lock().output_state == ServerOutputState::Ready);
        assert_eq!(*received.lock().unwrap(), payload);
        threads.join();
    }

    #[test]
    fn pipelined_responses_keep_request_order() {
        let (server, mock, conn, threads) = setup(make_handler(echo_id));
        let mut state = server.connected(&conn);

        server.request_received(&conn, &mut state, get("a"));
        eventually(|| state.lock().input_state == ServerInputState::Ready);
        server.request_received(&conn, &mut state, get("b"));

        eventually(|| {
            server.response_ready(&conn, &mut state);
            mock.submitted().len() == 2
        });

        let events = mock.events.lock().unwrap().clone();
        let submits: Vec<_> = events.iter().filter(|e| e.starts_with("submit")).collect();
        assert_eq!(submits, ["submit 200 a", "submit 200 b"]);
        threads.join();
    }

    #[test]
    fn late_writability_does_not_lose_earlier_response() {
        let handler = make_handler(|request: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
            let id = request.headers().get("x-id").cloned().unwrap_or(HeaderValue::from_static("-"));
            *response.body_mut() = Body::from(id.as_bytes().repeat(40));
            response.headers_mut().insert("x-id", id);
            Ok::<(), HandlerError>(())
        });
        let (server, mock, conn, threads) = setup(handler);
        let mut state = server.connected(&conn);

        server.request_received(&conn, &mut state, get("a"));
        eventually(|| state.lock().input_state == ServerInputState::Ready);
        server.request_received(&conn, &mut state, get("b"));

        // the reactor reports writability only after both workers ran
        thread::sleep(Duration::from_millis(100));
        {
            let exchange = state.lock();
            let staged = exchange.response.as_ref().and_then(|head| head.headers().get("x-id").cloned());
            assert_eq!(staged.as_ref().map(HeaderValue::as_bytes), Some(&b"a"[..]));
        }

        eventually(|| {
            server.response_ready(&conn, &mut state);
            mock.submitted().len() == 1
        });
        assert_eq!(drain_response(&server, &conn, &mut state, PayloadSize::Length(40)), b"a".repeat(40));

        eventually(|| {
            server.response_ready(&conn, &mut state);
            mock.submitted().len() == 2
        });
        assert_eq!(drain_response(&server, &conn, &mut state, PayloadSize::Length(40)), b"b".repeat(40));

        let events = mock.events.lock().unwrap().clone();
        let submits: Vec<_> = events.iter().filter(|e| e.starts_with("submit")).collect();
        assert_eq!(submits, ["submit 200 a", "submit 200 b"]);
        eventually(|| !state.lock().output_claimed);
        threads.join();
    }

    #[test]
    fn request_during_body_is_bad_request() {
        let (server, mock, conn, threads) = setup(make_handler(echo_id));
        let mut state = server.connected(&conn);

        let head = Request::post("/").header(CONTENT_LENGTH, 10).body(()).unwrap();
        server.request_received(&conn, &mut state, head);
        server.request_received(&conn, &mut state, get("b"));

        assert_eq!(mock.submitted(), [StatusCode::BAD_REQUEST]);
        assert!(mock.saw("close"));
        assert!(state.is_shutdown());
        threads.join();
    }

    #[test]
    fn shutdown_releases_worker_waiting_for_previous_response() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let handler = make_handler(move |_: Request<RequestBody>, _: &mut Response<Body>, _: &mut HttpContext| {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        });
        let (server, _mock, conn, threads) = setup(handler);
        let mut state = server.connected(&conn);

        // a previous response is still on its way out
        state.lock().output_state = ServerOutputState::ResponseBodyStream;
        server.request_received(&conn, &mut state, get("1"));
        thread::sleep(Duration::from_millis(20));

        server.exception(&conn, &mut state, HttpError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset)));
        threads.join();
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_releases_worker_waiting_for_continue() {
        let (server, mock, conn, threads) = setup(make_handler(echo_id));
        let mut state = server.connected(&conn);

        let head = Request::post("/").header(EXPECT, "100-continue").header(CONTENT_LENGTH, 10).body(()).unwrap();
        server.request_received(&conn, &mut state, head);
        eventually(|| state.lock().response.is_some());
        assert_eq!(state.lock().response.as_ref().unwrap().status(), StatusCode::CONTINUE);

        server.timeout(&conn, &mut state);
        threads.join();
        assert!(mock.saw("shutdown"));
        assert!(mock.submitted().is_empty());
    }

    #[test]
    fn continue_then_body() {
        let echo = |mut request: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
            let content = request.body_mut().read_to_bytes()?;
            *response.body_mut() = Body::from(content);
            Ok::<(), HandlerError>(())
        };
        let (server, mock, conn, threads) = setup(make_handler(echo));
        let mut state = server.connected(&conn);

        let head = Request::post("/").header(EXPECT, "100-continue").header(CONTENT_LENGTH, 10).body(()).unwrap();
        server.request_received(&conn, &mut state, head);
        eventually(|| {
            server.response_ready(&conn, &mut state);
            mock.submitted().first() == Some(&StatusCode::CONTINUE)
        });

        let mut framing = PayloadDecoder::from(PayloadSize::Length(10));
        let mut wire = BytesMut::from(&b"0123456789"[..]);
        let mut decoder = SessionDecoder::new(&mut framing, &mut wire);
        server.input_ready(&conn, &mut state, &mut decoder);

        eventually(|| {
            server.response_ready(&conn, &mut state);
            mock.submitted().len() == 2
        });
        assert_eq!(drain_response(&server, &conn, &mut state, PayloadSize::Length(10)), b"0123456789");
        threads.join();
    }

    #[test]
    fn failed_expectation_skips_handler_and_body() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let handler = make_handler(move |_: Request<RequestBody>, _: &mut Response<Body>, _: &mut HttpContext| {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        });
        let (server, mock, conn, threads) = setup(handler);
        let verifier = |_: &RequestHead, response: &mut ResponseHead, _: &mut HttpContext| {
            *response.status_mut() = StatusCode::EXPECTATION_FAILED;
            Ok::<(), HandlerError>(())
        };
        let server = server.with_expectation_verifier(Arc::new(verifier));
        let mut state = server.connected(&conn);

        let head = Request::put("/").header(EXPECT, "100-continue").header(CONTENT_LENGTH, 10).body(()).unwrap();
        server.request_received(&conn, &mut state, head);
        eventually(|| {
            server.response_ready(&conn, &mut state);
            state.lock().output_state == ServerOutputState::Ready && !mock.submitted().is_empty()
        });

        assert_eq!(mock.submitted(), [StatusCode::EXPECTATION_FAILED]);
        assert!(mock.saw("reset_input"));
        assert!(!invoked.load(Ordering::SeqCst));
        threads.join();
    }

    #[test]
    fn handler_failures_become_error_responses() {
        let handler = make_handler(|request: Request<RequestBody>, _: &mut Response<Body>, _: &mut HttpContext| {
            if request.uri() == "/panic" {
                panic!("handler bug");
            }
            Err(HandlerError::MethodNotSupported(Method::PATCH))
        });
        let (server, mock, conn, threads) = setup(handler);
        let mut state = server.connected(&conn);

        server.request_received(&conn, &mut state, Request::get("/fail").body(()).unwrap());
        eventually(|| {
            server.response_ready(&conn, &mut state);
            !mock.submitted().is_empty()
        });
        let head = crate::protocol::response::copy_head(&mock.submitted.lock().unwrap()[0]);
        assert_eq!(head.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(head.headers().get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
        let length = head.headers().get(CONTENT_LENGTH).unwrap().to_str().unwrap().parse().unwrap();
        let content = drain_response(&server, &conn, &mut state, PayloadSize::Length(length));
        assert_eq!(content, b"PATCH method not supported");
        eventually(|| state.lock().output_state == ServerOutputState::Ready);

        server.request_received(&conn, &mut state, Request::get("/panic").body(()).unwrap());
        eventually(|| {
            server.response_ready(&conn, &mut state);
            mock.submitted().len() == 2
        });
        assert_eq!(mock.submitted()[1], StatusCode::INTERNAL_SERVER_ERROR);
        state.shutdown();
        threads.join();
    }

    #[test]
    fn head_response_carries_no_body() {
        let handler = make_handler(|_: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
            *response.body_mut() = Body::from("not sent");
            Ok::<(), HandlerError>(())
        });
        let (server, mock, conn, threads) = setup(handler);
        let mut state = server.connected(&conn);

        server.request_received(&conn, &mut state, Request::head("/").body(()).unwrap());
        eventually(|| {
            server.response_ready(&conn, &mut state);
            !mock.submitted().is_empty()
        });
        // no output_ready needed, the exchange completes with the head
        eventually(|| state.lock().output_state == ServerOutputState::Ready);
        assert!(state.output_buffer().is_empty());
        threads.join();
    }

    #[test]
    fn protocol_error_answers_and_closes() {
        let (server, mock, conn, _threads) = setup(make_handler(echo_id));
        let mut state = server.connected(&conn);

        let head = Request::post("/").header(CONTENT_LENGTH, 3).header(TRANSFER_ENCODING, "chunked").body(()).unwrap();
        server.request_received(&conn, &mut state, head);

        assert_eq!(mock.submitted(), [StatusCode::BAD_REQUEST]);
        assert!(mock.saw("close"));
        assert!(state.is_shutdown());
    }

    #[test]
    fn response_version_is_capped() {
        assert_eq!(response_version(Version::HTTP_2), Version::HTTP_11);
        assert_eq!(response_version(Version::HTTP_10), Version::HTTP_10);
        assert!(!is_supported(Version::HTTP_09));
    }
}
