//! Parser driver for HTTP/1.1 response messages.
//!
//! The tokenizing work is delegated to `httparse`; this module turns its
//! output into state transitions on the response record. Two passes share the
//! same machinery:
//!
//! * the ingestion pass fills the caller's header buffer until the response
//!   head is complete, then hands framing knowledge to [`body::BodyDecoder`]
//!   which produces de-framed payload;
//! * the search pass re-parses an already-filled header buffer to look up a
//!   single named header without disturbing ingestion state.

use crate::error::Error;

pub(crate) mod body;

/// Upper bound on response header lines the driver will tokenize.
pub const MAX_RESPONSE_HEADERS: usize = 32;

/// Position within the HTTP/1.1 response message.
///
/// Monotonic over the lifetime of one exchange; the search pass never touches
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ParserState {
    /// No response bytes processed yet.
    Idle,
    /// At least one byte of the status line or headers has been seen.
    InHeaders,
    /// The terminal blank line of the head has been consumed.
    HeadersComplete,
    /// At least one body payload byte has been produced.
    InBody,
    /// The end of the message has been reached.
    BodyComplete,
}

/// Which in-place role the response buffers currently serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferState {
    /// Not processing.
    Idle,
    /// Raw head bytes are being accumulated in the header buffer.
    FillingHeaders,
    /// De-framed payload is being written to the body buffer.
    FillingBody,
    /// The exchange is done; flush parsing must not touch the buffers.
    Finished,
}

/// Everything the engine needs from a completed response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeadInfo {
    /// Status code from the status line.
    pub status: u16,
    /// Length of the head including the terminal `\r\n\r\n`.
    pub head_len: usize,
    /// Value of the `Content-Length` header, when present and well-formed.
    pub content_length: Option<u64>,
    /// Whether `Transfer-Encoding: chunked` applies.
    pub chunked: bool,
}

/// Try to parse a response head out of the filled header region.
///
/// Returns `Ok(None)` while the head is still incomplete; more bytes must be
/// received. Trailing bytes past the head (the start of the body) are expected
/// and left alone.
pub(crate) fn parse_head(filled: &[u8]) -> Result<Option<HeadInfo>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(filled) {
        Ok(httparse::Status::Complete(head_len)) => {
            let status = response.code.ok_or(Error::Parsing)?;
            let content_length = content_length(response.headers)?;
            let chunked = is_chunked(response.headers);
            log::debug!(
                "response head complete: status {status}, {} header bytes",
                head_len
            );
            Ok(Some(HeadInfo {
                status,
                head_len,
                content_length,
                chunked,
            }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => {
            log::error!("failed to parse the response head: {e}");
            Err(Error::Parsing)
        }
    }
}

/// Search pass: look up `name` in an already-filled header region.
///
/// Runs a fresh parse over the buffer; header lines that were tokenized before
/// the parse stopped are searched even if the head is truncated. The returned
/// slice borrows the header buffer.
pub(crate) fn find_header<'a>(filled: &'a [u8], name: &str) -> Result<Option<&'a [u8]>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    if let Err(e) = response.parse(filled) {
        log::error!("failed to re-parse the header buffer: {e}");
        return Err(Error::Parsing);
    }
    Ok(response
        .headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value))
}

fn content_length(headers: &[httparse::Header<'_>]) -> Result<Option<u64>, Error> {
    let Some(value) = header_value(headers, "Content-Length") else {
        return Ok(None);
    };
    let text = core::str::from_utf8(value).map_err(|_| Error::Parsing)?;
    let n = text.trim().parse::<u64>().map_err(|_| Error::Parsing)?;
    Ok(Some(n))
}

fn is_chunked(headers: &[httparse::Header<'_>]) -> bool {
    match header_value(headers, "Transfer-Encoding") {
        Some(value) => core::str::from_utf8(value)
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false),
        None => false,
    }
}

fn header_value<'a>(headers: &'a [httparse::Header<'_>], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}
