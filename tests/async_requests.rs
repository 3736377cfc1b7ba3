//! Callback-driven exchanges: streaming bodies, deferred request bodies,
//! cancellation, and connection-closed notification.

mod common;

use std::sync::mpsc::{channel, Sender};
use std::time::Duration;

use common::{ManualPool, MockFactory, MockServer};
use libhttps::{
    AsyncHandler, BodyReader, CancelHandle, Connection, ConnectionInfo, Error, Method, Request,
    RequestInfo, RequestMode, Response, ThreadPool,
};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Established,
    Complete {
        status: Result<(), Error>,
        http_status: Option<u16>,
        body: Vec<u8>,
        read_calls: usize,
        largest_read: usize,
    },
    Closed,
    Errored(Error),
}

/// Records every callback and streams the body through a bounded buffer.
struct RecordingHandler {
    events: Sender<Event>,
    read_buffer_size: usize,
    request_body: Option<Vec<u8>>,
    extra_header: Option<(&'static str, &'static str)>,
    collected: Vec<u8>,
    read_calls: usize,
    largest_read: usize,
}

impl RecordingHandler {
    fn new(events: Sender<Event>, read_buffer_size: usize) -> Self {
        Self {
            events,
            read_buffer_size,
            request_body: None,
            extra_header: None,
            collected: Vec::new(),
            read_calls: 0,
            largest_read: 0,
        }
    }
}

impl AsyncHandler for RecordingHandler {
    fn connection_established(&mut self) {
        let _ = self.events.send(Event::Established);
    }

    fn append_headers(&mut self, request: &mut Request) {
        if let Some((name, value)) = self.extra_header.take() {
            request.add_header(name, value).unwrap();
        }
    }

    fn write_body(&mut self, request: &mut Request) {
        if let Some(body) = self.request_body.take() {
            request.write_body(body, true).unwrap();
        }
    }

    fn read_ready(&mut self, body: &mut BodyReader<'_>) {
        assert_eq!(body.status().unwrap(), 200);
        let mut chunk = vec![0u8; self.read_buffer_size];
        match body.read_body(&mut chunk) {
            Ok(n) => {
                self.read_calls += 1;
                self.largest_read = self.largest_read.max(n);
                self.collected.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                let _ = self.events.send(Event::Errored(e));
            }
        }
    }

    fn response_complete(&mut self, status: Result<(), Error>, response: Response) {
        let _ = self.events.send(Event::Complete {
            status,
            http_status: response.status().ok(),
            body: std::mem::take(&mut self.collected),
            read_calls: self.read_calls,
            largest_read: self.largest_read,
        });
    }

    fn connection_closed(&mut self) {
        let _ = self.events.send(Event::Closed);
    }

    fn error(&mut self, error: Error) {
        let _ = self.events.send(Event::Errored(error));
    }
}

fn async_request(method: Method, path: &'static str) -> Request {
    Request::new(RequestInfo {
        method,
        path,
        host: "example.com",
        user_buffer: vec![0; 512],
        response_user_buffer: vec![0; 512],
        is_non_persistent: false,
        mode: RequestMode::Async,
    })
    .unwrap()
}

fn connect(server: &MockServer) -> Connection<MockFactory, ThreadPool> {
    Connection::connect(
        ConnectionInfo::new("example.com", 443),
        server.factory(),
        ThreadPool::new(2).unwrap(),
    )
    .unwrap()
}

fn recv(events: &std::sync::mpsc::Receiver<Event>) -> Event {
    events
        .recv_timeout(Duration::from_secs(10))
        .expect("no callback event arrived")
}

#[test]
fn streams_a_large_body_through_a_small_buffer() {
    let server = MockServer::new();
    let connection = connect(&server);

    let body: Vec<u8> = (0..10 * 1024).map(|i| (i % 251) as u8).collect();
    let mut wire = b"HTTP/1.1 200 OK\r\nContent-Length: 10240\r\n\r\n".to_vec();
    wire.extend_from_slice(&body);
    server.respond_after(2, &wire);

    let (events, receiver) = channel();
    let handler = RecordingHandler::new(events, 1024);
    connection
        .send_async(async_request(Method::Get, "/large"), Box::new(handler))
        .unwrap();

    assert_eq!(recv(&receiver), Event::Established);
    match recv(&receiver) {
        Event::Complete {
            status,
            http_status,
            body: collected,
            read_calls,
            largest_read,
        } => {
            assert_eq!(status, Ok(()));
            assert_eq!(http_status, Some(200));
            assert_eq!(collected, body);
            // 10 KiB through a 1 KiB buffer: ten reads, none oversized.
            assert_eq!(read_calls, 10);
            assert!(largest_read <= 1024);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(connection.is_connected());
}

#[test]
fn request_body_is_supplied_by_the_write_callback() {
    let server = MockServer::new();
    let connection = connect(&server);
    server.respond_after(3, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

    let (events, receiver) = channel();
    let mut handler = RecordingHandler::new(events, 64);
    handler.request_body = Some(b"k=v".to_vec());
    handler.extra_header = Some(("Content-Type", "application/x-www-form-urlencoded"));
    connection
        .send_async(async_request(Method::Post, "/form"), Box::new(handler))
        .unwrap();

    assert_eq!(recv(&receiver), Event::Established);
    match recv(&receiver) {
        Event::Complete { status, .. } => assert_eq!(status, Ok(())),
        other => panic!("unexpected event: {other:?}"),
    }

    let sent = String::from_utf8(server.sent()).unwrap();
    assert!(sent.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
    assert!(sent.ends_with("Content-Length: 3\r\nConnection: keep-alive\r\n\r\nk=v"));
}

#[test]
fn cancelled_request_aborts_and_the_next_one_proceeds() {
    let server = MockServer::new();
    let pool = ManualPool::new();
    let connection = Connection::connect(
        ConnectionInfo::new("example.com", 443),
        server.factory(),
        pool.clone(),
    )
    .unwrap();

    let (first_events, first_receiver) = channel();
    let (second_events, second_receiver) = channel();

    let first = async_request(Method::Get, "/doomed");
    let cancel: CancelHandle = first.cancel_handle();
    connection
        .send_async(first, Box::new(RecordingHandler::new(first_events, 64)))
        .unwrap();
    connection
        .send_async(
            async_request(Method::Get, "/survivor"),
            Box::new(RecordingHandler::new(second_events, 64)),
        )
        .unwrap();

    // Cancel the head of the queue before its send task runs.
    cancel.cancel();
    assert!(pool.run_next());

    assert_eq!(recv(&first_receiver), Event::Established);
    assert_eq!(recv(&first_receiver), Event::Errored(Error::AsyncCancelled));
    match recv(&first_receiver) {
        Event::Complete { status, .. } => assert_eq!(status, Err(Error::AsyncCancelled)),
        other => panic!("unexpected event: {other:?}"),
    }
    // Nothing of the cancelled request reached the wire.
    assert!(server.sent().is_empty());

    // The cancelled head rescheduled the survivor.
    server.respond_after(2, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    assert!(pool.run_next());

    assert_eq!(recv(&second_receiver), Event::Established);
    match recv(&second_receiver) {
        Event::Complete {
            status, body, ..
        } => {
            assert_eq!(status, Ok(()));
            assert_eq!(body, b"ok");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    let sent = String::from_utf8(server.sent()).unwrap();
    assert!(sent.starts_with("GET /survivor HTTP/1.1\r\n"));
}

#[test]
fn non_persistent_async_request_reports_connection_closed() {
    let server = MockServer::new();
    let connection = connect(&server);
    server.respond_after(2, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");

    let (events, receiver) = channel();
    let request = Request::new(RequestInfo {
        method: Method::Get,
        path: "/bye",
        host: "example.com",
        user_buffer: vec![0; 512],
        response_user_buffer: vec![0; 512],
        is_non_persistent: true,
        mode: RequestMode::Async,
    })
    .unwrap();
    connection
        .send_async(request, Box::new(RecordingHandler::new(events, 64)))
        .unwrap();

    assert_eq!(recv(&receiver), Event::Established);
    assert_eq!(recv(&receiver), Event::Closed);
    match recv(&receiver) {
        Event::Complete { status, body, .. } => {
            assert_eq!(status, Ok(()));
            assert_eq!(body, b"ok");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!connection.is_connected());
}

#[test]
fn send_async_rejects_a_synchronous_request() {
    let server = MockServer::new();
    let connection = connect(&server);
    let request = Request::new(RequestInfo {
        method: Method::Get,
        path: "/",
        host: "example.com",
        user_buffer: vec![0; 512],
        response_user_buffer: vec![0; 512],
        is_non_persistent: false,
        mode: RequestMode::Sync(libhttps::SyncInfo {
            body: None,
            response_body_buffer: Vec::new(),
        }),
    })
    .unwrap();
    let (events, _receiver) = channel();
    assert_eq!(
        connection.send_async(request, Box::new(RecordingHandler::new(events, 64))),
        Err(Error::InvalidParameter)
    );
}
