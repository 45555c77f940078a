//! Full exchanges between the client and server handlers over the loopback
//! reactor, with request handlers running on a tokio blocking pool.

use bytes::{Bytes, BytesMut};
use http::header::EXPECT;
use http::{Request, Response, StatusCode};
use micro_nio::client::{ClientExchangeHandler, ClientRequest, ClientResponse, RequestExecutionHandler};
use micro_nio::codec::{ContentDecoder, ContentEncoder};
use micro_nio::config::ExchangeConfig;
use micro_nio::connection::{HttpContext, IoControl};
use micro_nio::entity::{Body, BufferingConsumer, BytesProducer, ConsumingEntity, ProducingEntity, RequestBody};
use micro_nio::loopback::Loopback;
use micro_nio::protocol::{HandlerError, HttpError, ParseError, PayloadSize, RequestHead, ResponseHead, SendError};
use micro_nio::server::{HandlerRegistry, RequestHandler, ThrottlingServerHandler, make_handler};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEADLINE: Duration = Duration::from_secs(30);

fn init_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).with_test_writer().finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread().worker_threads(1).max_blocking_threads(4).build().unwrap()
}

type SinkFactory = Box<dyn Fn(&ResponseHead) -> Option<Box<dyn ConsumingEntity>>>;

/// Completed response as seen by the application.
#[derive(Debug)]
struct Outcome {
    status: StatusCode,
    keep_alive: bool,
    content: Option<Bytes>,
}

/// Sends a fixed list of requests one after the other.
struct Script {
    requests: Mutex<VecDeque<ClientRequest>>,
    outcomes: Mutex<Vec<Outcome>>,
    failures: Mutex<Vec<String>>,
    sink: SinkFactory,
}

impl Script {
    fn new(requests: Vec<ClientRequest>) -> Self {
        Self {
            requests: Mutex::new(requests.into()),
            outcomes: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            sink: Box::new(|_| Some(Box::new(BufferingConsumer::new()))),
        }
    }

    fn with_sink(mut self, sink: SinkFactory) -> Self {
        self.sink = sink;
        self
    }

    fn completed(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }
}

impl RequestExecutionHandler for Script {
    fn submit_request(&self, _context: &mut HttpContext) -> Option<ClientRequest> {
        self.requests.lock().unwrap().pop_front()
    }

    fn response_entity(&self, response: &ResponseHead, _context: &mut HttpContext) -> Option<Box<dyn ConsumingEntity>> {
        (self.sink)(response)
    }

    fn handle_response(&self, response: ClientResponse, _context: &mut HttpContext) {
        let keep_alive = !response.headers().get(http::header::CONNECTION).is_some_and(|v| v == "close");
        let (parts, entity) = response.into_parts();
        let content = entity.and_then(|entity| entity.into_bytes());
        self.outcomes.lock().unwrap().push(Outcome { status: parts.status, keep_alive, content });
    }

    fn failed(&self, error: &HttpError, _context: &mut HttpContext) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

/// Records how much of its body was handed to the encoder.
struct TrackedProducer {
    inner: BytesProducer,
    written: Arc<AtomicUsize>,
}

impl ProducingEntity for TrackedProducer {
    fn payload_size(&self) -> PayloadSize {
        self.inner.payload_size()
    }

    fn produce_content(&mut self, encoder: &mut dyn ContentEncoder, control: &dyn IoControl) -> Result<(), SendError> {
        let before = self.inner.remaining();
        let result = self.inner.produce_content(encoder, control);
        self.written.fetch_add(before - self.inner.remaining(), Ordering::SeqCst);
        result
    }
}

/// Checks a streamed body against [`pattern_byte`] without keeping it.
struct PatternChecker {
    scratch: BytesMut,
    position: Arc<AtomicU64>,
    mismatches: Arc<AtomicU64>,
}

impl ConsumingEntity for PatternChecker {
    fn consume_content(&mut self, decoder: &mut dyn ContentDecoder, _control: &dyn IoControl) -> Result<(), ParseError> {
        loop {
            self.scratch.clear();
            let n = decoder.read(&mut self.scratch, 16 * 1024)?;
            let mut position = self.position.load(Ordering::SeqCst);
            for byte in &self.scratch[..] {
                if *byte != pattern_byte(position) {
                    self.mismatches.fetch_add(1, Ordering::SeqCst);
                }
                position += 1;
            }
            self.position.store(position, Ordering::SeqCst);
            if n == 0 || decoder.is_completed() {
                return Ok(());
            }
        }
    }
}

fn pattern_byte(position: u64) -> u8 {
    (position % 251) as u8
}

fn server<H: RequestHandler + 'static>(runtime: &Runtime, handler: H, config: ExchangeConfig) -> ThrottlingServerHandler<H> {
    ThrottlingServerHandler::new(handler, Arc::new(runtime.handle().clone()), config)
}

#[test]
fn simple_get_keeps_connection_alive() {
    init_tracing();
    let runtime = runtime();

    let mut registry = HandlerRegistry::new();
    registry
        .register(
            "/",
            make_handler(|_: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
                *response.status_mut() = StatusCode::OK;
                Ok::<(), HandlerError>(())
            }),
        )
        .unwrap();

    let requests = vec![Request::get("/").body(None).unwrap(), Request::get("/").body(None).unwrap()];
    let client = ClientExchangeHandler::new(Script::new(requests), ExchangeConfig::default());
    let mut loopback = Loopback::new(client, server(&runtime, registry, ExchangeConfig::default()));

    assert!(loopback.run_until(DEADLINE, |client, _| client.exec_handler().completed() == 2));

    let script = loopback.client_handler().exec_handler();
    let outcomes = script.outcomes.lock().unwrap();
    for outcome in outcomes.iter() {
        assert_eq!(outcome.status, StatusCode::OK);
        assert!(outcome.keep_alive);
        assert!(outcome.content.is_none());
    }
    drop(outcomes);
    assert!(script.failures.lock().unwrap().is_empty());
    assert!(!loopback.is_client_closed());
    assert!(!loopback.is_server_closed());
}

#[test]
fn expect_continue_delivers_body() {
    init_tracing();
    let runtime = runtime();
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    let handler = make_handler(move |mut request: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
        let content = request.body_mut().read_to_bytes()?;
        sink.lock().unwrap().push(content.clone());
        *response.body_mut() = Body::from(format!("got {} bytes", content.len()));
        Ok::<(), HandlerError>(())
    });

    let body: Box<dyn ProducingEntity> = Box::new(BytesProducer::new("0123456789"));
    let request = Request::post("/upload").header(EXPECT, "100-continue").body(Some(body)).unwrap();
    let client = ClientExchangeHandler::new(Script::new(vec![request]), ExchangeConfig::default());
    let mut loopback = Loopback::new(client, server(&runtime, handler, ExchangeConfig::default()));

    assert!(loopback.run_until(DEADLINE, |client, _| client.exec_handler().completed() == 1));

    assert_eq!(*received.lock().unwrap(), vec![Bytes::from_static(b"0123456789")]);
    let outcomes = loopback.client_handler().exec_handler().outcomes.lock().unwrap();
    assert_eq!(outcomes[0].status, StatusCode::OK);
    assert_eq!(outcomes[0].content.as_deref(), Some(&b"got 10 bytes"[..]));
}

#[test]
fn failed_expectation_never_sends_body() {
    init_tracing();
    let runtime = runtime();
    let invoked = Arc::new(AtomicUsize::new(0));
    let written = Arc::new(AtomicUsize::new(0));

    let calls = Arc::clone(&invoked);
    let handler = make_handler(move |_: Request<RequestBody>, _: &mut Response<Body>, _: &mut HttpContext| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<(), HandlerError>(())
    });
    let verifier = |_: &RequestHead, response: &mut ResponseHead, _: &mut HttpContext| {
        *response.status_mut() = StatusCode::EXPECTATION_FAILED;
        Ok::<(), HandlerError>(())
    };
    let server = server(&runtime, handler, ExchangeConfig::default()).with_expectation_verifier(Arc::new(verifier));

    let producer = TrackedProducer { inner: BytesProducer::new("0123456789"), written: Arc::clone(&written) };
    let body: Box<dyn ProducingEntity> = Box::new(producer);
    let request = Request::post("/upload").header(EXPECT, "100-continue").body(Some(body)).unwrap();
    let config = ExchangeConfig::default().with_wait_for_continue(Duration::from_secs(10));
    let client = ClientExchangeHandler::new(Script::new(vec![request]), config);
    let mut loopback = Loopback::new(client, server);

    assert!(loopback.run_until(DEADLINE, |client, _| client.exec_handler().completed() == 1));

    let outcomes = loopback.client_handler().exec_handler().outcomes.lock().unwrap();
    assert_eq!(outcomes[0].status, StatusCode::EXPECTATION_FAILED);
    drop(outcomes);
    assert_eq!(written.load(Ordering::SeqCst), 0);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[test]
fn large_response_streams_through_bounded_buffer() {
    const BODY_SIZE: u64 = 50 * 1024 * 1024;
    init_tracing();
    let runtime = runtime();

    let handler = make_handler(|_: Request<RequestBody>, response: &mut Response<Body>, _: &mut HttpContext| {
        *response.body_mut() = Body::from_writer(Some(BODY_SIZE), |out| {
            // a whole number of pattern periods, so every block starts at 0
            let block: Vec<u8> = (0..251 * 256).map(pattern_byte).collect();
            let mut remaining = BODY_SIZE as usize;
            while remaining > 0 {
                let n = remaining.min(block.len());
                out.write_all(&block[..n])?;
                remaining -= n;
            }
            Ok(())
        });
        Ok::<(), HandlerError>(())
    });

    let position = Arc::new(AtomicU64::new(0));
    let mismatches = Arc::new(AtomicU64::new(0));
    let (seen, wrong) = (Arc::clone(&position), Arc::clone(&mismatches));
    let script = Script::new(vec![Request::get("/large").body(None).unwrap()]).with_sink(Box::new(move |_| {
        Some(Box::new(PatternChecker { scratch: BytesMut::new(), position: Arc::clone(&seen), mismatches: Arc::clone(&wrong) }))
    }));

    let config = ExchangeConfig::default().with_buffer_capacity(20 * 1024);
    let client = ClientExchangeHandler::new(script, ExchangeConfig::default());
    let mut loopback = Loopback::new(client, server(&runtime, handler, config));

    assert!(loopback.run_until(Duration::from_secs(120), |client, _| client.exec_handler().completed() == 1));

    let outcomes = loopback.client_handler().exec_handler().outcomes.lock().unwrap();
    assert_eq!(outcomes[0].status, StatusCode::OK);
    drop(outcomes);
    assert_eq!(position.load(Ordering::SeqCst), BODY_SIZE);
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    assert!(loopback.server_session().output_buffer().capacity() <= 20 * 1024);
}

#[test]
fn request_body_reaches_handler_in_pieces() {
    init_tracing();
    let runtime = runtime();
    let total = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&total);
    let handler = make_handler(move |mut request: Request<RequestBody>, _: &mut Response<Body>, _: &mut HttpContext| {
        let mut chunk = [0u8; 1000];
        loop {
            let n = request.body_mut().read(&mut chunk)?;
            if n == 0 {
                break;
            }
            counter.fetch_add(n, Ordering::SeqCst);
        }
        Ok::<(), HandlerError>(())
    });

    let content = vec![b'z'; 300 * 1024];
    let body: Box<dyn ProducingEntity> = Box::new(BytesProducer::chunked(content));
    let request = Request::put("/blob").body(Some(body)).unwrap();
    let client = ClientExchangeHandler::new(Script::new(vec![request]), ExchangeConfig::default());
    let config = ExchangeConfig::default().with_buffer_capacity(4 * 1024);
    let mut loopback = Loopback::new(client, server(&runtime, handler, config));

    assert!(loopback.run_until(DEADLINE, |client, _| client.exec_handler().completed() == 1));
    assert_eq!(total.load(Ordering::SeqCst), 300 * 1024);
}
