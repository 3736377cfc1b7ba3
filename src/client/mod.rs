//! Connection lifecycle, request scheduling, and the receive dispatcher.
//!
//! A [`Connection`] owns one transport stream and a bounded FIFO of submitted
//! requests. At most one request is ever in flight: the head of the queue is
//! sent by a task-pool job, its response is parsed on the transport's
//! receive-ready thread, and only then is the next queued request scheduled.
//! Responses are therefore consumed in the order requests were sent.
//!
//! Submission is either synchronous, where the caller blocks until the
//! exchange finishes, or asynchronous, where the application is driven
//! through the [`AsyncHandler`] callbacks.

use core::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::error::Error;
use crate::parse::{parse_head, BufferState, ParserState};
use crate::transport::{
    shutdown_quiet, Credentials, Io, ReceiveCallback, ServerInfo, Transport, TransportFactory,
};

pub mod request;
pub mod response;
pub mod task;

use request::Request;
use response::{BodyReader, Response};
use task::{Job, TaskPool};

/// Longest accepted host name.
pub const MAX_HOST_NAME_LENGTH: usize = 255;

/// Longest accepted ALPN protocol list.
pub const MAX_ALPN_PROTOCOLS_LENGTH: usize = 255;

/// Per-receive wait applied when [`ConnectionInfo::timeout_ms`] is zero.
pub const RESPONSE_WAIT_MS_DEFAULT: u32 = 1000;

/// Size of the scratch used to drain unread response bytes.
pub const FLUSH_BUFFER_SIZE: usize = 1024;

/// Most requests that can wait on one connection, the in-flight one included.
pub const MAX_PENDING_REQUESTS: usize = 8;

/// Network body reads are staged through a scratch of this size.
pub(crate) const RECV_SCRATCH: usize = 512;

/// Capacity for the auto-generated header tail.
const TAIL_CAP: usize = 80;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Server host name, at most [`MAX_HOST_NAME_LENGTH`] bytes.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Skip TLS entirely; no credentials are passed to the transport.
    pub non_tls: bool,
    /// Suppress SNI during the TLS handshake.
    pub disable_sni: bool,
    /// ALPN protocol list, at most [`MAX_ALPN_PROTOCOLS_LENGTH`] bytes.
    pub alpn_protocols: Option<String>,
    /// Per-receive wait in milliseconds; zero selects
    /// [`RESPONSE_WAIT_MS_DEFAULT`].
    pub timeout_ms: u32,
    /// Root CA certificate bytes.
    pub ca_cert: Option<Vec<u8>>,
    /// Client certificate bytes.
    pub client_cert: Option<Vec<u8>>,
    /// Client private key bytes.
    pub private_key: Option<Vec<u8>>,
}

impl ConnectionInfo {
    /// Connection info for a TLS connection with default options.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            non_tls: false,
            disable_sni: false,
            alpn_protocols: None,
            timeout_ms: 0,
            ca_cert: None,
            client_cert: None,
            private_key: None,
        }
    }
}

/// Callbacks driving an asynchronous request.
///
/// Every method has a no-op default, so an application implements only what
/// it needs. `append_headers` and `write_body` are each invoked exactly once
/// from the send task, before anything goes on the wire; `read_ready` is
/// invoked repeatedly while response body data is available.
pub trait AsyncHandler: Send {
    /// The connection this request was submitted on is (or just became)
    /// established.
    fn connection_established(&mut self) {}

    /// Last chance to add request headers.
    fn append_headers(&mut self, request: &mut Request) {
        let _ = request;
    }

    /// Supply the request body through [`Request::write_body`]. Called once.
    fn write_body(&mut self, request: &mut Request) {
        let _ = request;
    }

    /// Response body data is available; consume it through
    /// [`BodyReader::read_body`].
    fn read_ready(&mut self, body: &mut BodyReader<'_>) {
        let _ = body;
    }

    /// The exchange finished; ownership of the response returns here.
    fn response_complete(&mut self, status: Result<(), Error>, response: Response) {
        let _ = (status, response);
    }

    /// The connection was dropped, either fatally or because the request was
    /// non-persistent.
    fn connection_closed(&mut self) {}

    /// An error occurred after submission.
    fn error(&mut self, error: Error) {
        let _ = error;
    }
}

/// How the finished exchange is delivered.
enum Completion {
    Sync(SyncSender<(Result<(), Error>, Response)>),
    Async(Box<dyn AsyncHandler>),
}

/// One submitted request/response pair travelling through the scheduler.
struct Exchange {
    request: Request,
    response: Response,
    completion: Completion,
    cancelled: Arc<AtomicBool>,
}

impl Exchange {
    fn deliver(self, status: Result<(), Error>) {
        let Exchange {
            response,
            completion,
            ..
        } = self;
        match completion {
            Completion::Sync(sender) => {
                // The waiter may have timed out and gone away.
                let _ = sender.send((status, response));
            }
            Completion::Async(mut handler) => {
                if let Err(e) = status {
                    handler.error(e);
                }
                handler.response_complete(status, response);
            }
        }
    }
}

/// The at-most-one-in-flight slot.
///
/// `Sending` marks a request whose bytes are still going out; response data
/// arriving in that window (or with the slot idle) is a protocol violation by
/// the server. `Ready` parks the exchange between the end of its send and the
/// receive-ready notification.
enum Expecting {
    Idle,
    Sending,
    Ready(Exchange),
}

struct Scheduler {
    pending: heapless::Deque<Exchange, MAX_PENDING_REQUESTS>,
    busy: bool,
}

struct Core<F: TransportFactory, P> {
    factory: F,
    pool: P,
    info: ConnectionInfo,
    timeout_ms: u32,
    transport: RwLock<Option<Arc<F::Transport>>>,
    connected: AtomicBool,
    /// Bumped whenever the transport is invalidated. A send task records the
    /// epoch it started under and refuses to park its exchange across a bump,
    /// so a stale send can never claim the in-flight slot of a connection
    /// that was torn down and re-established underneath it.
    epoch: AtomicU64,
    scheduler: Mutex<Scheduler>,
    expecting: Mutex<Expecting>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection to one origin over a caller-provided transport.
///
/// Cloning shares the same underlying connection, like copying a handle.
pub struct Connection<F, P>
where
    F: TransportFactory,
    P: TaskPool,
{
    core: Arc<Core<F, P>>,
}

impl<F, P> Clone for Connection<F, P>
where
    F: TransportFactory,
    P: TaskPool,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<F, P> Connection<F, P>
where
    F: TransportFactory + 'static,
    F::Transport: 'static,
    P: TaskPool,
{
    /// Connect to the server described by `info`.
    ///
    /// The factory creates the transport (with credentials unless
    /// [`ConnectionInfo::non_tls`] is set) and the receive-ready callback is
    /// installed on it. The info, factory, and pool are retained so a later
    /// submit can re-establish a dropped connection implicitly.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidParameter`] for an empty or over-long host, or an
    ///   over-long ALPN list.
    /// * [`Error::ConnectionError`] when the transport cannot connect.
    /// * [`Error::InternalError`] when the receive callback cannot be
    ///   installed.
    pub fn connect(info: ConnectionInfo, factory: F, pool: P) -> Result<Self, Error> {
        if info.host.is_empty() || info.host.len() > MAX_HOST_NAME_LENGTH {
            log::error!(
                "host name length {} is out of range (1..={MAX_HOST_NAME_LENGTH})",
                info.host.len()
            );
            return Err(Error::InvalidParameter);
        }
        if let Some(alpn) = &info.alpn_protocols {
            if alpn.len() > MAX_ALPN_PROTOCOLS_LENGTH {
                log::error!(
                    "ALPN protocol list length {} exceeds the maximum of {MAX_ALPN_PROTOCOLS_LENGTH}",
                    alpn.len()
                );
                return Err(Error::InvalidParameter);
            }
        }
        let timeout_ms = if info.timeout_ms == 0 {
            RESPONSE_WAIT_MS_DEFAULT
        } else {
            info.timeout_ms
        };
        let core = Arc::new(Core {
            factory,
            pool,
            info,
            timeout_ms,
            transport: RwLock::new(None),
            connected: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            scheduler: Mutex::new(Scheduler {
                pending: heapless::Deque::new(),
                busy: false,
            }),
            expecting: Mutex::new(Expecting::Idle),
        });
        core.establish()?;
        Ok(Self { core })
    }

    /// Whether the transport is currently up.
    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::SeqCst)
    }

    /// Disconnect from the server.
    ///
    /// Pending requests are failed with [`Error::NetworkError`]. If a send is
    /// still in progress the stream is shut down but the transport is not
    /// destroyed, and [`Error::Busy`] is reported.
    pub fn disconnect(&self) -> Result<(), Error> {
        let core = &self.core;
        core.connected.store(false, Ordering::SeqCst);
        core.epoch.fetch_add(1, Ordering::SeqCst);
        // Close first so a receive blocked inside the transport wakes up.
        if let Some(transport) = core.transport_handle() {
            if let Err(e) = transport.close() {
                log::warn!("failed to shut down the transport: {e:?}");
            }
        }
        let busy = matches!(&*lock(&core.expecting), Expecting::Sending);
        if !busy {
            let taken = std::mem::replace(&mut *lock(&core.expecting), Expecting::Idle);
            if let Expecting::Ready(exchange) = taken {
                exchange.deliver(Err(Error::NetworkError));
            }
        }
        // An in-flight send task still owns the scheduler's busy flag; it
        // observes the epoch bump, fails its exchange, and releases the
        // scheduler itself.
        core.fail_pending(!busy);
        if busy {
            log::error!("connection is in use; disconnected but not destroyed");
            return Err(Error::Busy);
        }
        if let Some(transport) = core
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            transport.destroy();
        }
        Ok(())
    }

    /// Tear the live connection down and establish a fresh one from the
    /// stored [`ConnectionInfo`].
    ///
    /// Equivalent to connecting an already-connected handle: the current
    /// stream is shut down first. While a request is still sending this
    /// reports [`Error::Busy`] and leaves the connection down, like
    /// [`disconnect`].
    ///
    /// [`disconnect`]: Connection::disconnect
    pub fn reconnect(&self) -> Result<(), Error> {
        self.disconnect()?;
        self.core.establish()
    }

    /// Submit a synchronous request and block until its response is in.
    ///
    /// `timeout_ms` bounds the wait; zero waits indefinitely. On expiry the
    /// request is cancelled and [`Error::Busy`] is reported.
    ///
    /// A disconnected connection is re-established first. The request is
    /// consumed; the paired response comes back on success. HTTP status codes
    /// are data, not errors: a 500 still returns `Ok(response)`.
    pub fn send_sync(&self, mut request: Request, timeout_ms: u32) -> Result<Response, Error> {
        if request.is_async {
            log::error!("send_sync called on an asynchronous request");
            return Err(Error::InvalidParameter);
        }
        let response = request.response.take().ok_or(Error::InvalidParameter)?;
        let cancelled = Arc::clone(&request.cancelled);
        let (sender, receiver) = sync_channel(1);
        let exchange = Exchange {
            request,
            response,
            completion: Completion::Sync(sender),
            cancelled: Arc::clone(&cancelled),
        };
        self.core.ensure_connected()?;
        self.core.submit(exchange)?;

        let (status, response) = if timeout_ms == 0 {
            receiver.recv().map_err(|_| Error::NetworkError)?
        } else {
            match receiver.recv_timeout(Duration::from_millis(u64::from(timeout_ms))) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    log::error!("timed out after {timeout_ms} ms waiting for the response");
                    cancelled.store(true, Ordering::SeqCst);
                    return Err(Error::Busy);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::NetworkError),
            }
        };
        status.map(|()| response)
    }

    /// Submit an asynchronous request; `handler` is driven as the exchange
    /// progresses and receives the response when it completes.
    ///
    /// A disconnected connection is re-established first, after which
    /// `connection_established` fires.
    pub fn send_async(&self, mut request: Request, mut handler: Box<dyn AsyncHandler>) -> Result<(), Error> {
        if !request.is_async {
            log::error!("send_async called on a synchronous request");
            return Err(Error::InvalidParameter);
        }
        let response = request.response.take().ok_or(Error::InvalidParameter)?;
        self.core.ensure_connected()?;
        handler.connection_established();
        let cancelled = Arc::clone(&request.cancelled);
        self.core.submit(Exchange {
            request,
            response,
            completion: Completion::Async(handler),
            cancelled,
        })
    }
}

impl<F, P> Core<F, P>
where
    F: TransportFactory + 'static,
    F::Transport: 'static,
    P: TaskPool,
{
    fn transport_handle(&self) -> Option<Arc<F::Transport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_connected(self: &Arc<Self>) -> Result<(), Error> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        log::debug!("connection to {} is down; connecting implicitly", self.info.host);
        self.establish()
    }

    fn establish(self: &Arc<Self>) -> Result<(), Error> {
        let server = ServerInfo {
            host: &self.info.host,
            port: self.info.port,
            timeout_ms: self.timeout_ms,
        };
        let credentials = Credentials {
            root_ca: self.info.ca_cert.as_deref(),
            client_cert: self.info.client_cert.as_deref(),
            private_key: self.info.private_key.as_deref(),
            alpn_protocols: self.info.alpn_protocols.as_deref(),
            disable_sni: self.info.disable_sni,
        };
        let credentials = (!self.info.non_tls).then_some(&credentials);
        let transport = match self.factory.create(&server, credentials) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                log::error!(
                    "failed to connect to {}:{}: {e:?}",
                    self.info.host,
                    self.info.port
                );
                return Err(Error::ConnectionError);
            }
        };
        let weak = Arc::downgrade(self);
        let callback: ReceiveCallback = Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.on_receive_ready();
            }
        });
        if let Err(e) = transport.set_receive_callback(callback) {
            log::error!("failed to install the receive callback: {e:?}");
            shutdown_quiet(&*transport);
            return Err(Error::InternalError);
        }
        *self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
        self.connected.store(true, Ordering::SeqCst);
        log::debug!("connected to {}:{}", self.info.host, self.info.port);
        Ok(())
    }

    /// Append to the FIFO, scheduling the send task when the connection is
    /// idle.
    fn submit(self: &Arc<Self>, exchange: Exchange) -> Result<(), Error> {
        let mut scheduler = lock(&self.scheduler);
        if scheduler.busy || !scheduler.pending.is_empty() {
            if scheduler.pending.push_back(exchange).is_err() {
                log::error!("request queue is full ({MAX_PENDING_REQUESTS} pending)");
                return Err(Error::Busy);
            }
            log::debug!("request queued behind the one in flight");
            Ok(())
        } else {
            scheduler.busy = true;
            drop(scheduler);
            match self.schedule_send(exchange) {
                Ok(()) => Ok(()),
                Err(e) => {
                    lock(&self.scheduler).busy = false;
                    Err(e)
                }
            }
        }
    }

    fn schedule_send(self: &Arc<Self>, exchange: Exchange) -> Result<(), Error> {
        let core = Arc::clone(self);
        let job: Job = Box::new(move || core.run_send_task(exchange));
        self.pool.schedule(job).map_err(|e| {
            log::error!("failed to schedule the send task: {e:?}");
            Error::AsyncScheduling
        })
    }

    /// Pop the next queued exchange and schedule its send, or go idle.
    fn schedule_next(self: &Arc<Self>) {
        let next = {
            let mut scheduler = lock(&self.scheduler);
            match scheduler.pending.pop_front() {
                Some(exchange) => Some(exchange),
                None => {
                    scheduler.busy = false;
                    None
                }
            }
        };
        if let Some(exchange) = next {
            log::debug!("scheduling the next queued request");
            if let Err(e) = self.schedule_send(exchange) {
                log::error!("failed to schedule the next queued request: {e}");
                lock(&self.scheduler).busy = false;
            }
        }
    }

    fn finish_failed(self: &Arc<Self>, exchange: Exchange, error: Error) {
        exchange.deliver(Err(error));
        self.schedule_next();
    }

    /// The send task, run on a task-pool worker.
    fn run_send_task(self: &Arc<Self>, mut exchange: Exchange) {
        log::debug!("send task started");
        if exchange.cancelled.load(Ordering::SeqCst) {
            log::debug!("request was cancelled before sending");
            self.finish_failed(exchange, Error::AsyncCancelled);
            return;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        *lock(&self.expecting) = Expecting::Sending;

        if let Completion::Async(handler) = &mut exchange.completion {
            handler.append_headers(&mut exchange.request);
        }
        if exchange.cancelled.load(Ordering::SeqCst) {
            log::debug!("request was cancelled while appending headers");
            *lock(&self.expecting) = Expecting::Idle;
            self.finish_failed(exchange, Error::AsyncCancelled);
            return;
        }
        // One shot, so Content-Length can be computed from the final body.
        if let Completion::Async(handler) = &mut exchange.completion {
            handler.write_body(&mut exchange.request);
        }

        let transport = match self.transport_handle() {
            Some(transport) => transport,
            None => {
                *lock(&self.expecting) = Expecting::Idle;
                self.finish_failed(exchange, Error::NetworkError);
                return;
            }
        };
        match send_request(&*transport, &exchange.request) {
            Ok(()) => {
                // Even a request cancelled at this point has its bytes on the
                // wire; park it so the dispatcher can drain the response. A
                // stale task (the transport was invalidated mid-send) must
                // not claim the slot: its bytes went to a dead stream.
                let mut slot = lock(&self.expecting);
                if self.connected.load(Ordering::SeqCst)
                    && self.epoch.load(Ordering::SeqCst) == epoch
                {
                    *slot = Expecting::Ready(exchange);
                } else {
                    drop(slot);
                    log::debug!("connection went down while sending");
                    self.finish_failed(exchange, Error::NetworkError);
                }
            }
            Err(e) => {
                log::error!("error sending the request: {e}");
                *lock(&self.expecting) = Expecting::Idle;
                self.finish_failed(exchange, e);
            }
        }
    }

    /// Receive dispatch, run on the transport's receive-ready thread.
    fn on_receive_ready(self: &Arc<Self>) {
        let taken = std::mem::replace(&mut *lock(&self.expecting), Expecting::Idle);
        let mut exchange = match taken {
            Expecting::Ready(exchange) => exchange,
            Expecting::Sending => {
                log::error!("response data arrived before the request finished sending");
                self.teardown(true);
                return;
            }
            Expecting::Idle => {
                log::error!("response data arrived with no response expected");
                self.teardown(false);
                return;
            }
        };
        let Some(transport) = self.transport_handle() else {
            self.teardown(false);
            if let Completion::Async(handler) = &mut exchange.completion {
                handler.connection_closed();
            }
            exchange.deliver(Err(Error::NetworkError));
            return;
        };
        let io: &dyn Io = &*transport;

        let mut fatal = false;
        let mut status: Result<(), Error> = Ok(());
        if exchange.cancelled.load(Ordering::SeqCst) {
            log::debug!("request was cancelled; skipping response parsing");
            status = Err(Error::AsyncCancelled);
        } else {
            exchange.response.reset_for_receive();
            status = receive_headers(io, &mut exchange.response);
            if status.is_ok() {
                status = if exchange.response.is_async {
                    receive_body_async(io, &mut exchange)
                } else {
                    receive_body_sync(io, &mut exchange.response)
                };
            }
            if let Err(e) = status {
                // A framing violation poisons the stream: the next exchange
                // could start mid-message.
                if matches!(e, Error::Parsing | Error::InsufficientMemory) {
                    fatal = true;
                }
                log::error!("error receiving the response: {e}");
            }
        }

        if fatal || exchange.request.is_non_persistent {
            self.teardown(false);
            if let Completion::Async(handler) = &mut exchange.completion {
                handler.connection_closed();
            }
        } else {
            exchange.response.buffer_state = BufferState::Finished;
            if let Err(e) = flush_connection(io, &mut exchange.response) {
                log::warn!("error while flushing the connection: {e}");
            }
            self.schedule_next();
        }
        exchange.deliver(status);
    }

    /// Drop the transport and fail everything that was waiting on it.
    ///
    /// `sending_in_progress` marks a send task still running on a pool
    /// thread; it keeps ownership of the scheduler's busy flag and releases
    /// it on its own failure path.
    fn teardown(&self, sending_in_progress: bool) {
        self.connected.store(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(transport) = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            shutdown_quiet(&*transport);
        }
        self.fail_pending(!sending_in_progress);
    }

    fn fail_pending(&self, release_busy: bool) {
        loop {
            let next = lock(&self.scheduler).pending.pop_front();
            match next {
                Some(exchange) => exchange.deliver(Err(Error::NetworkError)),
                None => break,
            }
        }
        if release_busy {
            lock(&self.scheduler).busy = false;
        }
    }
}

/// Send the formatted head, the auto-generated tail, and the body.
fn send_request(io: &dyn Io, request: &Request) -> Result<(), Error> {
    io.send_all(request.headers.filled())?;

    let body_len = request.body.as_ref().map_or(0, Vec::len);
    let mut tail: heapless::String<TAIL_CAP> = heapless::String::new();
    if body_len > 0 {
        write!(tail, "Content-Length: {body_len}\r\n").map_err(|_| Error::InternalError)?;
    }
    let connection_line = if request.is_non_persistent {
        "Connection: close\r\n"
    } else {
        "Connection: keep-alive\r\n"
    };
    tail.push_str(connection_line)
        .map_err(|_| Error::InternalError)?;
    tail.push_str("\r\n").map_err(|_| Error::InternalError)?;
    io.send_all(tail.as_bytes())?;

    if let Some(body) = &request.body {
        if !body.is_empty() {
            io.send_all(body)?;
        }
    }
    Ok(())
}

/// Drive the header buffer to `HeadersComplete`.
fn receive_headers(io: &dyn Io, response: &mut Response) -> Result<(), Error> {
    response.buffer_state = BufferState::FillingHeaders;
    let mut net_status = None;
    while response.parser_state < ParserState::HeadersComplete {
        if response.headers.remaining() == 0 {
            log::error!(
                "response head does not fit into the {} byte header buffer",
                response.headers.capacity()
            );
            return Err(Error::InsufficientMemory);
        }
        match io.recv_some(response.headers.free_mut()) {
            Ok(n) => {
                response.headers.advance(n);
                if response.parser_state < ParserState::InHeaders {
                    response.parser_state = ParserState::InHeaders;
                }
                if let Some(head) = parse_head(response.headers.filled())? {
                    response.apply_head(head);
                }
            }
            Err(e) => {
                net_status = Some(e);
                break;
            }
        }
    }
    if response.parser_state < ParserState::HeadersComplete {
        let e = net_status.unwrap_or(Error::NetworkError);
        log::error!("failed to receive the response head: {e}");
        return Err(e);
    }
    Ok(())
}

/// Drive the body buffer to `BodyComplete` for a synchronous exchange.
fn receive_body_sync(io: &dyn Io, response: &mut Response) -> Result<(), Error> {
    response.buffer_state = BufferState::FillingBody;
    response.consume_prefix()?;
    let mut net_status = None;
    loop {
        if response.decoder_complete() {
            break;
        }
        let room = response.body.remaining();
        if room == 0 && response.body.capacity() > 0 {
            break; // body buffer full with message bytes remaining
        }
        let mut scratch = [0u8; RECV_SCRATCH];
        let want = if response.body.capacity() == 0 {
            scratch.len()
        } else {
            scratch.len().min(room)
        };
        match io.recv_some(&mut scratch[..want]) {
            Ok(n) => response.feed_body(&scratch[..n])?,
            Err(e) => {
                if !response.finish_on_eof() {
                    net_status = Some(e);
                }
                break;
            }
        }
    }
    if response.decoder_complete() {
        return Ok(());
    }
    match net_status {
        Some(e) => {
            log::error!("network error receiving the response body: {e}");
            Err(e)
        }
        None => {
            log::error!(
                "response body does not fit into the {} byte body buffer",
                response.body.capacity()
            );
            Err(Error::MessageTooLarge)
        }
    }
}

/// Drive the application's `read_ready` callback until the message completes,
/// the callback stops consuming, a receive fails, or the request is
/// cancelled.
fn receive_body_async(io: &dyn Io, exchange: &mut Exchange) -> Result<(), Error> {
    let Exchange {
        response,
        completion,
        cancelled,
        ..
    } = exchange;
    let Completion::Async(handler) = completion else {
        return Err(Error::InternalError);
    };
    loop {
        if response.parser_state >= ParserState::BodyComplete {
            break;
        }
        if response.body_rx_status.is_some() {
            break;
        }
        let mut reader = BodyReader {
            response: &mut *response,
            io,
            cancelled: &**cancelled,
            progressed: false,
        };
        handler.read_ready(&mut reader);
        let progressed = reader.progressed;
        if cancelled.load(Ordering::SeqCst) {
            log::debug!("request cancelled during the body callback");
            return Err(Error::AsyncCancelled);
        }
        if !progressed {
            log::debug!("read_ready consumed nothing; leaving the remainder to the flush");
            break;
        }
    }
    match response.body_rx_status {
        None | Some(Error::Timeout) => Ok(()),
        Some(e) => Err(e),
    }
}

/// Drain unread response bytes so the next exchange starts on a message
/// boundary. A timeout means "nothing more"; before the head completes there
/// is no framing to follow, so the stream is drained until it goes quiet.
fn flush_connection(io: &dyn Io, response: &mut Response) -> Result<(), Error> {
    if response.parser_state >= ParserState::BodyComplete {
        return Ok(());
    }
    log::debug!("clearing the rest of the response from the connection");
    let mut scratch = [0u8; FLUSH_BUFFER_SIZE];
    loop {
        match io.recv_some(&mut scratch) {
            Ok(n) => {
                if response.parser_state >= ParserState::HeadersComplete {
                    response.feed_body(&scratch[..n])?;
                    if response.parser_state >= ParserState::BodyComplete {
                        break;
                    }
                }
            }
            Err(Error::Timeout) => {
                response.finish_on_eof();
                break;
            }
            Err(e) => {
                response.finish_on_eof();
                return Err(e);
            }
        }
    }
    Ok(())
}
