//! Common error type for HTTPS client operations
//!
//! This module defines the single status taxonomy used throughout the library.
//! Every public operation returns exactly one of these statuses; internal
//! routines use the same set so that a failure surfaces unchanged at the API
//! boundary.

/// A common error type for HTTPS client operations.
///
/// The set is deliberately flat and `Copy` so it can cross thread and callback
/// boundaries without ceremony, which matters on constrained targets.
///
/// # Examples
///
/// ```rust
/// use libhttps::Error;
///
/// fn handle_error(error: Error) {
///     match error {
///         Error::Timeout => println!("server did not answer in time"),
///         Error::MessageTooLarge => println!("response body buffer too small"),
///         other => println!("request failed: {other}"),
///     }
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum Error {
    /// A parameter was out of range or otherwise unusable.
    #[error("invalid parameter")]
    InvalidParameter,

    /// A caller-supplied buffer is too small for the data it must hold.
    #[error("caller buffer too small")]
    InsufficientMemory,

    /// The transport failed to establish a connection to the server.
    #[error("connection failed")]
    ConnectionError,

    /// A synchronization primitive or transport callback could not be set up.
    #[error("internal error")]
    InternalError,

    /// A send did not complete or the transport reported a transfer error.
    #[error("network error")]
    NetworkError,

    /// The transport receive window elapsed without data.
    #[error("timed out waiting for the server")]
    Timeout,

    /// The HTTP parser rejected the response message.
    #[error("malformed HTTP response")]
    Parsing,

    /// The response body exceeds the caller-supplied body buffer.
    #[error("response body exceeds the provided buffer")]
    MessageTooLarge,

    /// The request was cancelled cooperatively.
    #[error("request cancelled")]
    AsyncCancelled,

    /// The task pool refused to schedule the send job.
    #[error("failed to schedule the request")]
    AsyncScheduling,

    /// The connection is in use, the request queue is full, or a synchronous
    /// wait timed out.
    #[error("connection busy")]
    Busy,

    /// The requested header, status, or content length is not present.
    #[error("not found in the response")]
    NotFound,

    /// The operation is not supported, e.g. an incremental request body.
    #[error("not supported")]
    NotSupported,

    /// The single-shot request body was already written.
    #[error("request body already written")]
    MessageFinished,
}
