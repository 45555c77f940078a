//! In-memory reactor connecting one client and one server handler.
//!
//! [`Loopback`] plays the part of the I/O thread for both ends of a single
//! connection. Message heads and framed body bytes travel over two bounded
//! in-memory pipes; input and output interest, socket timeouts, graceful
//! close and hard shutdown behave like they do over a socket, so the
//! exchange handlers run unchanged on top of it.
//!
//! Worker threads of a server handler may call into the connection at any
//! time. Everything else happens on the thread calling
//! [`Loopback::run_until`].

use crate::codec::{ContentDecoder, ContentEncoder, PayloadDecoder, PayloadEncoder, SessionDecoder, SessionEncoder, payload_size};
use crate::connection::{ClientConnection, ClientEventHandler, HttpConnection, IoControl, ServerConnection, ServerEventHandler};
use crate::ensure;
use crate::protocol::{HttpError, PayloadSize, RequestHead, ResponseHead, can_response_have_body, request, response};
use bytes::{Bytes, BytesMut};
use http::Method;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Bytes each end buffers between the pipe and the content codecs.
pub const SESSION_BUFFER_SIZE: usize = 8 * 1024;

/// Body bytes a pipe holds before the writing end is throttled.
pub const WIRE_WINDOW: usize = 64 * 1024;

pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

const IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug)]
enum Segment {
    Request(RequestHead),
    Response(ResponseHead),
    Data(Bytes),
}

/// One direction of the connection.
#[derive(Debug, Default)]
struct Wire {
    segments: VecDeque<Segment>,
    data_len: usize,
    eof: bool,
}

impl Wire {
    fn room(&self) -> usize {
        WIRE_WINDOW.saturating_sub(self.data_len)
    }

    fn push_head(&mut self, segment: Segment) {
        self.segments.push_back(segment);
    }

    fn push_data(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.data_len += bytes.len();
        self.segments.push_back(Segment::Data(bytes));
    }

    /// Body bytes at the front of the pipe, at most `max` of them.
    fn pop_data(&mut self, max: usize) -> Option<Bytes> {
        if max == 0 {
            return None;
        }
        let Some(Segment::Data(bytes)) = self.segments.front_mut() else {
            return None;
        };

        let taken = if bytes.len() > max {
            bytes.split_to(max)
        } else {
            let taken = std::mem::take(bytes);
            self.segments.pop_front();
            taken
        };
        self.data_len -= taken.len();
        Some(taken)
    }

    fn pop_head(&mut self) -> Option<Segment> {
        match self.segments.front() {
            None | Some(Segment::Data(_)) => None,
            Some(_) => self.segments.pop_front(),
        }
    }

    fn is_drained(&self) -> bool {
        self.eof && self.segments.is_empty()
    }

    fn abort(&mut self) {
        self.segments.clear();
        self.data_len = 0;
        self.eof = true;
    }
}

/// Wakes the I/O thread when another thread changed interest.
#[derive(Debug, Default)]
struct Wakeup {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    fn notify(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self.cond.wait_timeout_while(pending, timeout, |pending| !*pending).unwrap_or_else(PoisonError::into_inner);
        *pending = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closing,
    Shutdown,
    Closed,
}

#[derive(Debug)]
struct EndpointState {
    input: bool,
    output: bool,
    status: Status,
    timeout: Duration,
    /// Heads submitted by the handler and not yet put on the wire, with
    /// the framing of the body that follows each of them.
    outgoing: VecDeque<(Segment, PayloadSize)>,
    /// A submitted message is still being written.
    sending: bool,
    reset_input: bool,
    reset_output: bool,
    /// Methods of the requests still waiting for their final response.
    methods: VecDeque<Method>,
}

/// The connection object handed to the exchange handlers.
#[derive(Debug)]
struct Endpoint {
    role: Role,
    state: Mutex<EndpointState>,
    wakeup: Arc<Wakeup>,
}

impl Endpoint {
    fn new(role: Role, wakeup: Arc<Wakeup>) -> Self {
        let state = EndpointState {
            input: true,
            output: true,
            status: Status::Open,
            timeout: DEFAULT_SOCKET_TIMEOUT,
            outgoing: VecDeque::new(),
            sending: false,
            reset_input: false,
            reset_output: false,
            methods: VecDeque::new(),
        };
        Self { role, state: Mutex::new(state), wakeup }
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F: FnOnce(&mut EndpointState)>(&self, f: F) {
        f(&mut self.lock());
        self.wakeup.notify();
    }

    fn submit(&self, segment: Segment, payload: PayloadSize) {
        self.update(|state| {
            state.sending = !payload.is_empty();
            state.outgoing.push_back((segment, payload));
        });
    }

    fn ensure_writable(state: &EndpointState) -> Result<(), HttpError> {
        ensure!(state.status == Status::Open, HttpError::ConnectionClosed);
        ensure!(!state.sending, HttpError::illegal_state("a message is still being written"));
        Ok(())
    }
}

impl IoControl for Endpoint {
    fn request_input(&self) {
        self.update(|state| state.input = true);
    }

    fn suspend_input(&self) {
        self.update(|state| state.input = false);
    }

    fn request_output(&self) {
        self.update(|state| state.output = true);
    }

    fn suspend_output(&self) {
        self.update(|state| state.output = false);
    }

    fn shutdown(&self) {
        self.update(|state| {
            if state.status != Status::Closed {
                state.status = Status::Shutdown;
            }
        });
    }
}

impl HttpConnection for Endpoint {
    fn reset_input(&self) {
        self.update(|state| state.reset_input = true);
    }

    fn reset_output(&self) {
        self.update(|state| {
            state.reset_output = true;
            state.sending = false;
        });
    }

    fn is_open(&self) -> bool {
        self.lock().status == Status::Open
    }

    fn close(&self) {
        self.update(|state| {
            if state.status == Status::Open {
                state.status = Status::Closing;
            }
        });
    }

    fn socket_timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn set_socket_timeout(&self, timeout: Duration) {
        self.lock().timeout = timeout;
    }
}

impl ClientConnection for Endpoint {
    fn submit_request(&self, head: &RequestHead) -> Result<(), HttpError> {
        if self.role != Role::Client {
            return Err(HttpError::illegal_state("requests are submitted by the client end"));
        }

        let payload = {
            let mut state = self.lock();
            Self::ensure_writable(&state)?;
            let payload = payload_size(head.headers())?;
            state.methods.push_back(head.method().clone());
            payload
        };
        self.submit(Segment::Request(request::copy_head(head)), payload);
        Ok(())
    }

    fn is_request_submitted(&self) -> bool {
        self.lock().sending
    }
}

impl ServerConnection for Endpoint {
    fn submit_response(&self, head: &ResponseHead) -> Result<(), HttpError> {
        if self.role != Role::Server {
            return Err(HttpError::illegal_state("responses are submitted by the server end"));
        }

        let payload = {
            let mut state = self.lock();
            Self::ensure_writable(&state)?;
            if head.status().is_informational() {
                PayloadSize::Empty
            } else {
                let method = state.methods.pop_front().unwrap_or(Method::GET);
                if can_response_have_body(&method, head.status()) { payload_size(head.headers())? } else { PayloadSize::Empty }
            }
        };
        self.submit(Segment::Response(response::copy_head(head)), payload);
        Ok(())
    }

    fn is_response_submitted(&self) -> bool {
        self.lock().sending
    }
}

/// The I/O thread's view of one end.
#[derive(Debug)]
struct Side {
    encoder: Option<PayloadEncoder>,
    decoder: Option<PayloadDecoder>,
    session_in: BytesMut,
    session_out: BytesMut,
    last_activity: Instant,
    closed: bool,
}

impl Side {
    fn new() -> Self {
        Self {
            encoder: None,
            decoder: None,
            session_in: BytesMut::with_capacity(SESSION_BUFFER_SIZE),
            session_out: BytesMut::with_capacity(SESSION_BUFFER_SIZE),
            last_activity: Instant::now(),
            closed: false,
        }
    }
}

/// Uniform view of the client and server callbacks.
trait Peer {
    fn head(&mut self, head: Segment);
    fn idle_output(&mut self);
    fn output(&mut self, encoder: &mut dyn ContentEncoder);
    fn input(&mut self, decoder: &mut dyn ContentDecoder);
    fn exception(&mut self, error: HttpError);
    fn timeout(&mut self);
    fn closed(&mut self);
}

struct ClientPeer<'a, C: ClientEventHandler> {
    handler: &'a C,
    conn: &'a Endpoint,
    session: &'a mut C::Session,
}

impl<C: ClientEventHandler> Peer for ClientPeer<'_, C> {
    fn head(&mut self, head: Segment) {
        if let Segment::Response(head) = head {
            self.handler.response_received(self.conn, self.session, head);
        }
    }

    fn idle_output(&mut self) {
        self.handler.request_ready(self.conn, self.session);
    }

    fn output(&mut self, encoder: &mut dyn ContentEncoder) {
        self.handler.output_ready(self.conn, self.session, encoder);
    }

    fn input(&mut self, decoder: &mut dyn ContentDecoder) {
        self.handler.input_ready(self.conn, self.session, decoder);
    }

    fn exception(&mut self, error: HttpError) {
        self.handler.exception(self.conn, self.session, error);
    }

    fn timeout(&mut self) {
        self.handler.timeout(self.conn, self.session);
    }

    fn closed(&mut self) {
        self.handler.closed(self.conn, self.session);
    }
}

struct ServerPeer<'a, S: ServerEventHandler> {
    handler: &'a S,
    conn: &'a Arc<dyn ServerConnection>,
    session: &'a mut S::Session,
}

impl<S: ServerEventHandler> Peer for ServerPeer<'_, S> {
    fn head(&mut self, head: Segment) {
        if let Segment::Request(head) = head {
            self.handler.request_received(self.conn, self.session, head);
        }
    }

    fn idle_output(&mut self) {
        self.handler.response_ready(self.conn, self.session);
    }

    fn output(&mut self, encoder: &mut dyn ContentEncoder) {
        self.handler.output_ready(self.conn, self.session, encoder);
    }

    fn input(&mut self, decoder: &mut dyn ContentDecoder) {
        self.handler.input_ready(self.conn, self.session, decoder);
    }

    fn exception(&mut self, error: HttpError) {
        self.handler.exception(self.conn, self.session, error);
    }

    fn timeout(&mut self) {
        self.handler.timeout(self.conn, self.session);
    }

    fn closed(&mut self) {
        self.handler.closed(self.conn, self.session);
    }
}

/// A connected client/server pair driven by the calling thread.
pub struct Loopback<C: ClientEventHandler, S: ServerEventHandler> {
    client_handler: C,
    server_handler: S,
    client_endpoint: Arc<Endpoint>,
    server_endpoint: Arc<Endpoint>,
    server_conn: Arc<dyn ServerConnection>,
    client_session: C::Session,
    server_session: S::Session,
    client: Side,
    server: Side,
    to_server: Wire,
    to_client: Wire,
    wakeup: Arc<Wakeup>,
}

impl<C: ClientEventHandler, S: ServerEventHandler> Loopback<C, S> {
    /// Connects both handlers; the server end is set up first.
    pub fn new(client_handler: C, server_handler: S) -> Self {
        let wakeup = Arc::new(Wakeup::default());
        let client_endpoint = Arc::new(Endpoint::new(Role::Client, Arc::clone(&wakeup)));
        let server_endpoint = Arc::new(Endpoint::new(Role::Server, Arc::clone(&wakeup)));
        let server_conn: Arc<dyn ServerConnection> = Arc::clone(&server_endpoint) as Arc<dyn ServerConnection>;

        let server_session = server_handler.connected(&server_conn);
        let client_session = client_handler.connected(&*client_endpoint);
        debug!("loopback connection established");

        Self {
            client_handler,
            server_handler,
            client_endpoint,
            server_endpoint,
            server_conn,
            client_session,
            server_session,
            client: Side::new(),
            server: Side::new(),
            to_server: Wire::default(),
            to_client: Wire::default(),
            wakeup,
        }
    }

    pub fn client_handler(&self) -> &C {
        &self.client_handler
    }

    pub fn server_handler(&self) -> &S {
        &self.server_handler
    }

    pub fn client_session(&self) -> &C::Session {
        &self.client_session
    }

    pub fn server_session(&self) -> &S::Session {
        &self.server_session
    }

    pub fn is_client_closed(&self) -> bool {
        self.client.closed
    }

    pub fn is_server_closed(&self) -> bool {
        self.server.closed
    }

    /// Drives both ends until `done` holds or `timeout` elapsed.
    ///
    /// Returns the final value of `done`. Returns early once both ends are
    /// closed, as nothing can change any more.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&C, &S) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.client_handler, &self.server_handler) {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("loopback deadline reached");
                return false;
            }
            if self.client.closed && self.server.closed {
                return done(&self.client_handler, &self.server_handler);
            }

            if !self.poll() {
                self.wakeup.wait(IDLE_WAIT);
            }
        }
    }

    /// Runs one round over both ends; returns true if anything moved.
    pub fn poll(&mut self) -> bool {
        let mut client = ClientPeer { handler: &self.client_handler, conn: &*self.client_endpoint, session: &mut self.client_session };
        let client_progress = step(&self.client_endpoint, &mut self.client, &mut self.to_client, &mut self.to_server, &mut client);

        let mut server = ServerPeer { handler: &self.server_handler, conn: &self.server_conn, session: &mut self.server_session };
        let server_progress = step(&self.server_endpoint, &mut self.server, &mut self.to_server, &mut self.to_client, &mut server);

        client_progress || server_progress
    }

    /// Tears both ends down, delivering the `closed` events.
    pub fn shutdown(&mut self) {
        self.client_endpoint.shutdown();
        self.server_endpoint.shutdown();
        while !(self.client.closed && self.server.closed) {
            self.poll();
        }
    }
}

impl<C: ClientEventHandler, S: ServerEventHandler> Drop for Loopback<C, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: ClientEventHandler, S: ServerEventHandler> std::fmt::Debug for Loopback<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("client_closed", &self.client.closed)
            .field("server_closed", &self.server.closed)
            .finish_non_exhaustive()
    }
}

fn step(endpoint: &Endpoint, side: &mut Side, inbound: &mut Wire, outbound: &mut Wire, peer: &mut dyn Peer) -> bool {
    if side.closed {
        return false;
    }

    let (reset_input, reset_output, status) = {
        let mut state = endpoint.lock();
        let resets = (state.reset_input, state.reset_output, state.status);
        state.reset_input = false;
        state.reset_output = false;
        resets
    };
    if reset_input {
        side.decoder = None;
        side.session_in.clear();
    }
    if reset_output {
        side.encoder = None;
        side.session_out.clear();
    }

    match status {
        Status::Shutdown => {
            outbound.abort();
            return finish_close(endpoint, side, peer);
        }
        Status::Closing => {
            side.encoder = None;
            let progress = write_heads(endpoint, side, outbound) | flush(side, outbound);
            if endpoint.lock().outgoing.is_empty() && side.session_out.is_empty() {
                outbound.eof = true;
                return finish_close(endpoint, side, peer);
            }
            return progress;
        }
        Status::Closed => return false,
        Status::Open => {}
    }

    let mut progress = write_heads(endpoint, side, outbound);
    progress |= produce(endpoint, side, peer);
    progress |= flush(side, outbound);
    progress |= consume(endpoint, side, inbound, peer);

    if inbound.is_drained() && (side.decoder.is_none() || side.session_in.is_empty()) && endpoint.lock().status == Status::Open {
        trace!(role = ?endpoint.role, "peer closed the connection");
        outbound.eof = true;
        return finish_close(endpoint, side, peer);
    }

    if side.last_activity.elapsed() >= endpoint.socket_timeout() {
        side.last_activity = Instant::now();
        trace!(role = ?endpoint.role, "socket timeout");
        peer.timeout();
        progress = true;
    }
    progress
}

fn finish_close(endpoint: &Endpoint, side: &mut Side, peer: &mut dyn Peer) -> bool {
    {
        let mut state = endpoint.lock();
        state.status = Status::Closed;
        state.sending = false;
        state.outgoing.clear();
    }
    side.closed = true;
    side.encoder = None;
    side.decoder = None;
    debug!(role = ?endpoint.role, "loopback connection closed");
    peer.closed();
    true
}

/// Puts submitted heads on the wire; a head waits while the body of the
/// previous message is still being written.
fn write_heads(endpoint: &Endpoint, side: &mut Side, outbound: &mut Wire) -> bool {
    let mut progress = false;
    while side.encoder.is_none() {
        let Some((segment, payload)) = endpoint.lock().outgoing.pop_front() else {
            break;
        };
        outbound.push_head(segment);
        side.last_activity = Instant::now();
        progress = true;
        if !payload.is_empty() {
            side.encoder = Some(PayloadEncoder::from(payload));
        }
    }
    progress
}

fn produce(endpoint: &Endpoint, side: &mut Side, peer: &mut dyn Peer) -> bool {
    let (output, idle) = {
        let state = endpoint.lock();
        (state.output, !state.sending && state.outgoing.is_empty())
    };
    if !output {
        return false;
    }

    let Some(framing) = side.encoder.as_mut() else {
        if idle {
            peer.idle_output();
            return !endpoint.lock().outgoing.is_empty();
        }
        return false;
    };
    if side.session_out.len() >= SESSION_BUFFER_SIZE {
        return false;
    }

    let before = side.session_out.len();
    let finished = {
        let mut encoder = SessionEncoder::new(framing, &mut side.session_out, SESSION_BUFFER_SIZE);
        peer.output(&mut encoder);
        encoder.is_completed()
    };
    if finished {
        side.encoder = None;
        endpoint.lock().sending = false;
    }
    finished || side.session_out.len() != before
}

fn flush(side: &mut Side, outbound: &mut Wire) -> bool {
    let n = side.session_out.len().min(outbound.room());
    if n == 0 {
        return false;
    }
    outbound.push_data(side.session_out.split_to(n).freeze());
    side.last_activity = Instant::now();
    true
}

fn consume(endpoint: &Endpoint, side: &mut Side, inbound: &mut Wire, peer: &mut dyn Peer) -> bool {
    if !endpoint.lock().input {
        return false;
    }

    let Some(framing) = side.decoder.as_mut() else {
        return receive_head(endpoint, side, inbound, peer);
    };

    let mut progress = false;
    while let Some(bytes) = inbound.pop_data(SESSION_BUFFER_SIZE.saturating_sub(side.session_in.len())) {
        side.session_in.extend_from_slice(&bytes);
        side.last_activity = Instant::now();
        progress = true;
    }
    if side.session_in.is_empty() {
        return progress;
    }

    let before = side.session_in.len();
    let finished = {
        let mut decoder = SessionDecoder::new(framing, &mut side.session_in);
        peer.input(&mut decoder);
        decoder.is_completed()
    };
    if finished {
        side.decoder = None;
        if !side.session_in.is_empty() {
            warn!(role = ?endpoint.role, len = side.session_in.len(), "discard bytes after the end of the message body");
            side.session_in.clear();
        }
    }
    progress || finished || side.session_in.len() != before
}

fn receive_head(endpoint: &Endpoint, side: &mut Side, inbound: &mut Wire, peer: &mut dyn Peer) -> bool {
    let Some(segment) = inbound.pop_head() else {
        if let Some(bytes) = inbound.pop_data(usize::MAX) {
            warn!(role = ?endpoint.role, len = bytes.len(), "discard content without a message");
            return true;
        }
        return false;
    };
    side.last_activity = Instant::now();

    let payload = match &segment {
        Segment::Request(head) => {
            endpoint.lock().methods.push_back(head.method().clone());
            payload_size(head.headers())
        }
        Segment::Response(head) if head.status().is_informational() => Ok(PayloadSize::Empty),
        Segment::Response(head) => {
            let method = endpoint.lock().methods.pop_front().unwrap_or(Method::GET);
            if can_response_have_body(&method, head.status()) { payload_size(head.headers()) } else { Ok(PayloadSize::Empty) }
        }
        Segment::Data(_) => Ok(PayloadSize::Empty),
    };

    match payload {
        Ok(payload) => {
            if !payload.is_empty() {
                side.decoder = Some(PayloadDecoder::from(payload));
            }
            peer.head(segment);
        }
        Err(e) => peer.exception(e.into()),
    }
    true
}
