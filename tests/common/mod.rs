//! Shared test doubles: a scripted in-memory transport and task pools.
//!
//! The mock plays the server side of an exchange: tests script canned
//! response bytes to be delivered after the nth `send` call, at which point
//! the mock raises the receive-ready callback from a thread of its own, the
//! way a real transport would.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use libhttps::client::task::{Job, TaskPool};
use libhttps::transport::{Credentials, ReceiveCallback, ServerInfo, Transport, TransportFactory};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MockError(pub &'static str);

struct Script {
    after_sends: usize,
    delay_ms: u64,
    bytes: Vec<u8>,
}

struct ServerState {
    sent: Mutex<Vec<u8>>,
    rx: Mutex<VecDeque<u8>>,
    callback: Mutex<Option<ReceiveCallback>>,
    scripts: Mutex<Vec<Script>>,
    /// Serializes receive-ready callbacks, like a transport's single receive
    /// task: a notification only fires between callback invocations, and only
    /// while unconsumed data remains.
    notify: Mutex<()>,
    send_calls: AtomicUsize,
    /// Milliseconds every `send` stalls before touching the stream.
    send_delay_ms: AtomicUsize,
    connect_count: AtomicUsize,
    fail_next_connect: AtomicBool,
    /// Sticky record that some transport instance was closed.
    closed: AtomicBool,
}

/// Scripted peer for one connection's lifetime.
pub struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ServerState {
                sent: Mutex::new(Vec::new()),
                rx: Mutex::new(VecDeque::new()),
                callback: Mutex::new(None),
                scripts: Mutex::new(Vec::new()),
                notify: Mutex::new(()),
                send_calls: AtomicUsize::new(0),
                send_delay_ms: AtomicUsize::new(0),
                connect_count: AtomicUsize::new(0),
                fail_next_connect: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn factory(&self) -> MockFactory {
        MockFactory {
            state: Arc::clone(&self.state),
        }
    }

    /// Deliver `bytes` (and raise receive-ready) shortly after the nth
    /// `send` call completes.
    pub fn respond_after(&self, sends: usize, bytes: &[u8]) {
        self.respond_after_delayed(sends, 30, bytes);
    }

    /// Same, with a chosen delivery delay.
    pub fn respond_after_delayed(&self, sends: usize, delay_ms: u64, bytes: &[u8]) {
        lock(&self.state.scripts).push(Script {
            after_sends: sends,
            delay_ms,
            bytes: bytes.to_vec(),
        });
    }

    /// Everything the client has sent so far.
    pub fn sent(&self) -> Vec<u8> {
        lock(&self.state.sent).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Make the next `create` fail.
    pub fn fail_next_connect(&self) {
        self.state.fail_next_connect.store(true, Ordering::SeqCst);
    }

    /// Stall every `send` by `delay_ms`, opening a window to race the send.
    pub fn set_send_delay(&self, delay_ms: u64) {
        self.state
            .send_delay_ms
            .store(delay_ms as usize, Ordering::SeqCst);
    }
}

pub struct MockFactory {
    state: Arc<ServerState>,
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn create(
        &self,
        _server: &ServerInfo<'_>,
        _credentials: Option<&Credentials<'_>>,
    ) -> Result<MockTransport, MockError> {
        if self.state.fail_next_connect.swap(false, Ordering::SeqCst) {
            return Err(MockError("connection refused"));
        }
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct MockTransport {
    state: Arc<ServerState>,
    /// Closing one instance must not kill a replacement stream, so each
    /// transport tracks its own shutdown.
    closed: AtomicBool,
}

impl MockTransport {
    /// Queue scripted responses whose trigger count has been reached.
    fn fire_due_scripts(&self, completed_sends: usize) {
        let due: Vec<Script> = {
            let mut scripts = lock(&self.state.scripts);
            let mut due = Vec::new();
            let mut i = 0;
            while i < scripts.len() {
                if scripts[i].after_sends == completed_sends {
                    due.push(scripts.remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        for script in due {
            let state = Arc::clone(&self.state);
            thread::spawn(move || {
                // Let the client park the exchange first, the way network
                // latency would.
                thread::sleep(Duration::from_millis(script.delay_ms));
                lock(&state.rx).extend(script.bytes.iter().copied());
                let _serialized = lock(&state.notify);
                // Data consumed by an in-progress dispatch needs no
                // notification of its own.
                if lock(&state.rx).is_empty() {
                    return;
                }
                if let Some(callback) = &*lock(&state.callback) {
                    callback();
                }
            });
        }
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    fn set_receive_callback(&self, callback: ReceiveCallback) -> Result<(), MockError> {
        *lock(&self.state.callback) = Some(callback);
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> Result<usize, MockError> {
        let delay_ms = self.state.send_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms as u64));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Ok(0);
        }
        lock(&self.state.sent).extend_from_slice(buf);
        let completed = self.state.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.fire_due_scripts(completed);
        Ok(buf.len())
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize, MockError> {
        // Poll briefly, like a blocking socket with a read timeout.
        for _ in 0..20 {
            {
                let mut rx = lock(&self.state.rx);
                if !rx.is_empty() {
                    let n = buf.len().min(rx.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = rx.pop_front().unwrap();
                    }
                    return Ok(n);
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(0) // receive window elapsed
    }

    fn close(&self) -> Result<(), MockError> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Pool that runs nothing until the test says so; makes cancellation windows
/// deterministic.
#[derive(Clone)]
pub struct ManualPool {
    jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl ManualPool {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Run the oldest queued job on the calling thread. Returns whether one
    /// ran.
    pub fn run_next(&self) -> bool {
        let job = lock(&self.jobs).pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    pub fn queued(&self) -> usize {
        lock(&self.jobs).len()
    }
}

#[derive(Debug)]
pub struct NeverFails;

impl TaskPool for ManualPool {
    type Error = NeverFails;

    fn schedule(&self, job: Job) -> Result<(), NeverFails> {
        lock(&self.jobs).push_back(job);
        Ok(())
    }
}
