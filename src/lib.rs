//! # libhttps: HTTPS/1.1 client for constrained devices
//!
//! A lightweight HTTP/1.1 client that talks to HTTPS servers over a
//! caller-provided TLS transport, designed for devices where memory is
//! budgeted up front: every message buffer is supplied by the caller, and the
//! library never grows one.
//!
//! ## Features
//!
//! - HTTP/1.1 request formatting with automatic `User-Agent`, `Host`,
//!   `Content-Length`, and `Connection` headers
//! - Incremental response parsing into caller-supplied header and body
//!   buffers, including chunked transfer decoding
//! - Synchronous call-and-wait and asynchronous callback-driven requests
//! - Per-connection request queue with at-most-one request in flight
//! - Cooperative cancellation
//! - Transport- and executor-agnostic: bring your own TLS stack and worker
//!   pool
//!
//! ## Limitations
//!
//! - HTTP/1.1 only (no HTTP/2 or HTTP/3)
//! - No request pipelining: responses are consumed strictly in submission
//!   order, one at a time
//! - The request body must be fully known before sending so `Content-Length`
//!   can be computed
//! - No redirects, cookies, retries, DNS, or response decompression
//!
//! ## Example
//!
//! ```rust,ignore
//! use libhttps::prelude::*;
//!
//! // TlsFactory implements TransportFactory for your TLS stack.
//! let pool = ThreadPool::new(2)?;
//! let connection = Connection::connect(
//!     ConnectionInfo::new("example.com", 443),
//!     TlsFactory::new(root_ca),
//!     pool,
//! )?;
//!
//! let request = Request::new(RequestInfo {
//!     method: Method::Get,
//!     path: "/index.html",
//!     host: "example.com",
//!     user_buffer: vec![0; 512],
//!     response_user_buffer: vec![0; 512],
//!     is_non_persistent: false,
//!     mode: RequestMode::Sync(SyncInfo {
//!         body: None,
//!         response_body_buffer: vec![0; 256],
//!     }),
//! })?;
//!
//! let response = connection.send_sync(request, 5000)?;
//! println!("status: {}", response.status()?);
//! println!("body: {:?}", response.body());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub(crate) mod buffer;
pub(crate) mod parse;

/// Connection lifecycle, scheduling, and the request/response types.
pub mod client;

/// The status taxonomy returned by every operation.
pub mod error;

/// Transport capability consumed by the client.
pub mod transport;

pub use client::request::{
    CancelHandle, Method, Request, RequestInfo, RequestMode, SyncInfo,
    REQUEST_USER_BUFFER_MINIMUM_SIZE, USER_AGENT,
};
pub use client::response::{BodyReader, Response, RESPONSE_USER_BUFFER_MINIMUM_SIZE};
pub use client::task::{Job, TaskPool, ThreadPool};
pub use client::{
    AsyncHandler, Connection, ConnectionInfo, FLUSH_BUFFER_SIZE, MAX_ALPN_PROTOCOLS_LENGTH,
    MAX_HOST_NAME_LENGTH, MAX_PENDING_REQUESTS, RESPONSE_WAIT_MS_DEFAULT,
};
pub use error::Error;
pub use parse::MAX_RESPONSE_HEADERS;

/// Re-exports of the common types.
pub mod prelude {
    pub use super::client::task::{TaskPool, ThreadPool};
    pub use super::client::{AsyncHandler, Connection, ConnectionInfo};
    pub use super::error::Error;
    pub use super::transport::{Credentials, ServerInfo, Transport, TransportFactory};
    pub use super::{BodyReader, Method, Request, RequestInfo, RequestMode, Response, SyncInfo};
}
