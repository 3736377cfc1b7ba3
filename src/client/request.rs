//! Request construction and formatting.
//!
//! A request is formatted directly into the caller's request user buffer at
//! initialization time: request line first, then the default `User-Agent` and
//! `Host` headers, then any caller headers. The auto-generated tail
//! (`Content-Length`, `Connection`, blank line) is emitted at send time so the
//! body length can be computed from the final body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::BufferSpan;
use crate::client::response::Response;
use crate::error::Error;

/// Value of the auto-generated `User-Agent` header.
pub const USER_AGENT: &str = "libhttps";

/// Smallest usable request user buffer: the longest request line the library
/// can emit with an empty path, plus the two default header lines with an
/// empty host.
pub const REQUEST_USER_BUFFER_MINIMUM_SIZE: usize = "CONNECT / HTTP/1.1\r\n".len()
    + "User-Agent: ".len()
    + USER_AGENT.len()
    + "\r\n".len()
    + "Host: \r\n".len();

/// Headers the library generates itself; [`Request::add_header`] rejects them.
const AUTO_GENERATED_HEADERS: [&str; 4] = ["Content-Length", "Connection", "Host", "User-Agent"];

/// HTTP request methods supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// HTTP GET method for retrieving data.
    Get,
    /// HTTP HEAD method; the response carries headers only.
    Head,
    /// HTTP POST method for sending data.
    Post,
    /// HTTP PUT method for replacing data.
    Put,
    /// HTTP DELETE method for removing data.
    Delete,
}

impl Method {
    /// The method name as used in the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// Storage and body configuration for a synchronous request.
#[derive(Debug)]
pub struct SyncInfo {
    /// Request body, fully known up front so `Content-Length` can be
    /// computed. `None` sends no body.
    pub body: Option<Vec<u8>>,
    /// Region that receives the response body. May be empty, in which case
    /// the response body is read off the wire and discarded.
    pub response_body_buffer: Vec<u8>,
}

/// Execution mode of a request.
#[derive(Debug)]
pub enum RequestMode {
    /// Caller blocks on [`Connection::send_sync`].
    ///
    /// [`Connection::send_sync`]: crate::client::Connection::send_sync
    Sync(SyncInfo),
    /// Callback-driven; the body is supplied in the `write_body` callback and
    /// the response body is consumed through `read_ready`.
    Async,
}

/// Everything needed to initialize a [`Request`].
#[derive(Debug)]
pub struct RequestInfo<'a> {
    /// Request method.
    pub method: Method,
    /// Request path; an empty path is sent as `/`.
    pub path: &'a str,
    /// Value for the auto-generated `Host` header.
    pub host: &'a str,
    /// Caller-owned region the request head is formatted into. The region is
    /// the full length of the vector; it is never grown.
    pub user_buffer: Vec<u8>,
    /// Caller-owned region that receives the raw response head.
    pub response_user_buffer: Vec<u8>,
    /// Emit `Connection: close` and drop the connection after the response.
    pub is_non_persistent: bool,
    /// Synchronous or callback-driven execution.
    pub mode: RequestMode,
}

/// A formatted request paired with its response record.
///
/// Submitting the request to a connection consumes it; the paired response
/// comes back from `send_sync` or through the `response_complete` callback.
#[derive(Debug)]
pub struct Request {
    pub(crate) headers: BufferSpan,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) method: Method,
    pub(crate) is_non_persistent: bool,
    pub(crate) is_async: bool,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) response: Option<Response>,
}

impl Request {
    /// Format a request into the caller's buffers.
    ///
    /// Writes the request line and the default `User-Agent` and `Host`
    /// headers into `user_buffer` and initializes the paired response record
    /// over `response_user_buffer`. Both regions are zeroed first so leftover
    /// bytes can never be mistaken for message data.
    ///
    /// # Errors
    ///
    /// * [`Error::InsufficientMemory`] when either buffer is below its
    ///   exported minimum or the formatted lines do not fit.
    pub fn new(info: RequestInfo<'_>) -> Result<Self, Error> {
        let RequestInfo {
            method,
            path,
            host,
            user_buffer,
            response_user_buffer,
            is_non_persistent,
            mode,
        } = info;

        if user_buffer.len() < REQUEST_USER_BUFFER_MINIMUM_SIZE {
            log::error!(
                "request user buffer of {} bytes is below the minimum of {}",
                user_buffer.len(),
                REQUEST_USER_BUFFER_MINIMUM_SIZE
            );
            return Err(Error::InsufficientMemory);
        }
        if response_user_buffer.len() < crate::client::response::RESPONSE_USER_BUFFER_MINIMUM_SIZE {
            log::error!(
                "response user buffer of {} bytes is below the minimum of {}",
                response_user_buffer.len(),
                crate::client::response::RESPONSE_USER_BUFFER_MINIMUM_SIZE
            );
            return Err(Error::InsufficientMemory);
        }

        let (is_async, body, body_buffer) = match mode {
            RequestMode::Sync(sync) => (false, sync.body, sync.response_body_buffer),
            RequestMode::Async => (true, None, Vec::new()),
        };

        let mut headers = BufferSpan::new(user_buffer);
        let path = if path.is_empty() { "/" } else { path };
        headers.write(method.as_str().as_bytes())?;
        headers.write(b" ")?;
        headers.write(path.as_bytes())?;
        headers.write(b" HTTP/1.1\r\n")?;

        let mut request = Request {
            headers,
            body,
            method,
            is_non_persistent,
            is_async,
            cancelled: Arc::new(AtomicBool::new(false)),
            response: Some(Response::new(response_user_buffer, body_buffer, is_async, method)),
        };
        request.append_header("User-Agent", USER_AGENT)?;
        request.append_header("Host", host)?;
        Ok(request)
    }

    /// Append a caller header line `name: value`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidParameter`] for an empty name or one of the
    ///   auto-generated headers (`Content-Length`, `Connection`, `Host`,
    ///   `User-Agent`).
    /// * [`Error::InsufficientMemory`] when the line does not fit next to the
    ///   2 bytes reserved for the final blank line.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::InvalidParameter);
        }
        for auto in AUTO_GENERATED_HEADERS {
            if name.eq_ignore_ascii_case(auto) {
                log::error!("header \"{auto}\" is auto-generated and cannot be added");
                return Err(Error::InvalidParameter);
            }
        }
        self.append_header(name, value)
    }

    /// Supply the request body of an asynchronous request, exactly once.
    ///
    /// Intended to be called from the `write_body` callback. The body must be
    /// complete: streaming uploads are unsupported because `Content-Length`
    /// is computed from it.
    ///
    /// # Errors
    ///
    /// * [`Error::NotSupported`] when `is_complete` is false.
    /// * [`Error::InvalidParameter`] on a synchronous request (its body is
    ///   part of [`SyncInfo`]).
    /// * [`Error::MessageFinished`] when the body was already written.
    pub fn write_body(&mut self, body: Vec<u8>, is_complete: bool) -> Result<(), Error> {
        if !is_complete {
            log::error!("incremental request bodies are not supported");
            return Err(Error::NotSupported);
        }
        if !self.is_async {
            log::error!("write_body is only valid for an asynchronous request");
            return Err(Error::InvalidParameter);
        }
        if self.body.is_some() {
            log::error!("the request body was already written");
            return Err(Error::MessageFinished);
        }
        self.body = Some(body);
        Ok(())
    }

    /// A handle that can cancel this request after submission.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    fn append_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        // Reserve two bytes so the terminating blank line always fits.
        let needed = name.len() + ": ".len() + value.len() + "\r\n".len();
        if needed + "\r\n".len() > self.headers.remaining() {
            log::error!(
                "header \"{name}\" needs {} bytes but only {} are free",
                needed,
                self.headers.remaining()
            );
            return Err(Error::InsufficientMemory);
        }
        self.headers.write(name.as_bytes())?;
        self.headers.write(b": ")?;
        self.headers.write(value.as_bytes())?;
        self.headers.write(b"\r\n")?;
        Ok(())
    }
}

/// Cancels a submitted request cooperatively.
///
/// The flag is observed at the send-task checkpoints, around each turn of the
/// asynchronous body loop, and before response parsing begins. A cancelled
/// in-flight request still leaves its bytes on the wire; the connection
/// drains them before servicing the next request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}
