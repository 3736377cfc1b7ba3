//! Response record, body ingestion, and post-hoc reads.
//!
//! The raw response head accumulates in the caller's response user buffer;
//! the body is de-framed into a separate caller region, registered up front
//! for a synchronous exchange or supplied one piece at a time through
//! [`BodyReader::read_body`] for an asynchronous one. Body bytes that arrive
//! in the header buffer together with the head are remembered as a range and
//! consumed before any fresh network reads.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::buffer::BufferSpan;
use crate::client::request::Method;
use crate::client::RECV_SCRATCH;
use crate::error::Error;
use crate::parse::body::BodyDecoder;
use crate::parse::{self, BufferState, HeadInfo, ParserState};
use crate::transport::Io;

/// Smallest usable response user buffer: the shortest meaningful status head.
pub const RESPONSE_USER_BUFFER_MINIMUM_SIZE: usize = "HTTP/1.1 200 OK\r\n\r\n".len();

/// A received HTTP/1.1 response.
///
/// Created together with its request; returned to the caller by `send_sync`
/// or through the `response_complete` callback once the exchange finishes.
#[derive(Debug)]
pub struct Response {
    /// Raw head bytes (and possibly the start of the body) in the caller's
    /// response user buffer.
    pub(crate) headers: BufferSpan,
    /// Body region: de-framed payload only.
    pub(crate) body: BufferSpan,
    pub(crate) status: u16,
    pub(crate) content_length: Option<u64>,
    pub(crate) parser_state: ParserState,
    pub(crate) buffer_state: BufferState,
    pub(crate) decoder: Option<BodyDecoder>,
    /// Undecoded body bytes that arrived in the header buffer, as a
    /// (start, len) range that shrinks as they are consumed.
    pub(crate) prefix_start: usize,
    pub(crate) prefix_len: usize,
    /// Last network status observed while receiving the body.
    pub(crate) body_rx_status: Option<Error>,
    pub(crate) is_async: bool,
    pub(crate) method: Method,
}

impl Response {
    pub(crate) fn new(user_buffer: Vec<u8>, body_buffer: Vec<u8>, is_async: bool, method: Method) -> Self {
        Self {
            headers: BufferSpan::new(user_buffer),
            body: BufferSpan::new(body_buffer),
            status: 0,
            content_length: None,
            parser_state: ParserState::Idle,
            buffer_state: BufferState::Idle,
            decoder: None,
            prefix_start: 0,
            prefix_len: 0,
            body_rx_status: None,
            is_async,
            method,
        }
    }

    /// The response status code.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no status line was received.
    pub fn status(&self) -> Result<u16, Error> {
        if self.status == 0 {
            return Err(Error::NotFound);
        }
        Ok(self.status)
    }

    /// The value of the `Content-Length` header.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the header is absent or zero.
    pub fn content_length(&self) -> Result<u64, Error> {
        match self.content_length {
            Some(n) if n > 0 => Ok(n),
            _ => Err(Error::NotFound),
        }
    }

    /// Look up a response header by name, case-insensitively.
    ///
    /// Runs a fresh parse over the already-filled header buffer; ingestion
    /// state is not disturbed, so this can be called at any time after the
    /// exchange. The returned slice borrows the header buffer.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] when the header is not in the buffer.
    /// * [`Error::Parsing`] when the buffer does not re-parse.
    pub fn read_header(&self, name: &str) -> Result<&[u8], Error> {
        match parse::find_header(self.headers.filled(), name)? {
            Some(value) => Ok(value),
            None => {
                log::debug!("header \"{name}\" not found in the response");
                Err(Error::NotFound)
            }
        }
    }

    /// The de-framed response body received so far.
    ///
    /// For a synchronous exchange this is the filled part of the registered
    /// body buffer; for an asynchronous one the body was handed out through
    /// [`BodyReader::read_body`] and this is empty.
    pub fn body(&self) -> &[u8] {
        self.body.filled()
    }

    /// Reset parser progress so a fresh response can be ingested.
    pub(crate) fn reset_for_receive(&mut self) {
        self.parser_state = ParserState::Idle;
        self.buffer_state = BufferState::FillingHeaders;
        self.body_rx_status = None;
    }

    /// Record a completed head and pick the body framing.
    pub(crate) fn apply_head(&mut self, head: HeadInfo) {
        self.status = head.status;
        self.content_length = head.content_length;
        self.prefix_start = head.head_len;
        self.prefix_len = self.headers.len() - head.head_len;
        self.parser_state = ParserState::HeadersComplete;

        // HEAD responses and the body-less status codes carry no body bytes
        // on the wire, whatever their headers claim.
        let no_body = self.method == Method::Head || matches!(head.status, 100..=199 | 204 | 304);
        let decoder = if no_body {
            BodyDecoder::skip()
        } else if head.chunked {
            BodyDecoder::chunked()
        } else if let Some(n) = head.content_length {
            BodyDecoder::content_length(n)
        } else {
            BodyDecoder::until_close()
        };
        if decoder.is_complete() {
            self.parser_state = ParserState::BodyComplete;
        }
        self.decoder = Some(decoder);
    }

    /// Feed raw stream bytes through the decoder.
    ///
    /// Side effects are gated on the buffer state, exactly like ingestion:
    /// only `FillingBody` with a registered body region writes payload; the
    /// flush pass (`Finished`) and a sync exchange without a body buffer
    /// decode and discard.
    pub(crate) fn feed_body(&mut self, input: &[u8]) -> Result<(), Error> {
        let Response {
            body,
            decoder,
            buffer_state,
            ..
        } = self;
        let Some(decoder) = decoder.as_mut() else {
            return Err(Error::InternalError);
        };
        let write_payload = *buffer_state == BufferState::FillingBody && body.capacity() > 0;
        let consumed = if write_payload {
            let mut pos = 0;
            let consumed = decoder.feed(input, Some((body.free_mut(), &mut pos)))?;
            body.advance(pos);
            consumed
        } else {
            decoder.feed(input, None)?
        };
        // Network reads are bounded by the free body space, so the decoder
        // can always take the whole read.
        debug_assert_eq!(consumed, input.len());
        self.refresh_body_state();
        Ok(())
    }

    /// Move body bytes that arrived in the header buffer into the body
    /// region (or discard them when none is registered). Leaves whatever
    /// does not fit for a later destination.
    pub(crate) fn consume_prefix(&mut self) -> Result<(), Error> {
        while self.prefix_len > 0 {
            let Response {
                headers,
                body,
                decoder,
                buffer_state,
                prefix_start,
                prefix_len,
                ..
            } = self;
            let Some(decoder) = decoder.as_mut() else {
                return Err(Error::InternalError);
            };
            let chunk = headers.slice(*prefix_start, *prefix_len);
            let write_payload = *buffer_state == BufferState::FillingBody && body.capacity() > 0;
            let consumed = if write_payload {
                let mut pos = 0;
                let consumed = decoder.feed(chunk, Some((body.free_mut(), &mut pos)))?;
                body.advance(pos);
                consumed
            } else {
                decoder.feed(chunk, None)?
            };
            *prefix_start += consumed;
            *prefix_len -= consumed;
            if consumed == 0 {
                break; // destination full; the remainder waits
            }
        }
        self.refresh_body_state();
        Ok(())
    }

    /// The stream ended; completes an until-close body.
    pub(crate) fn finish_on_eof(&mut self) -> bool {
        if let Some(decoder) = self.decoder.as_mut() {
            if decoder.finish_on_eof() {
                self.parser_state = ParserState::BodyComplete;
                return true;
            }
        }
        false
    }

    pub(crate) fn decoder_complete(&self) -> bool {
        self.decoder.as_ref().is_some_and(|d| d.is_complete())
    }

    fn refresh_body_state(&mut self) {
        if let Some(decoder) = &self.decoder {
            if decoder.is_complete() {
                self.parser_state = ParserState::BodyComplete;
            } else if decoder.started() {
                self.parser_state = self.parser_state.max(ParserState::InBody);
            }
        }
    }
}

/// Hands the response body to an asynchronous application one caller buffer
/// at a time.
///
/// Passed to the `read_ready` callback; each [`read_body`] call fills the
/// supplied buffer with de-framed payload, first from body bytes that arrived
/// in the header buffer, then from the network.
///
/// [`read_body`]: BodyReader::read_body
pub struct BodyReader<'a> {
    pub(crate) response: &'a mut Response,
    pub(crate) io: &'a dyn Io,
    pub(crate) cancelled: &'a AtomicBool,
    pub(crate) progressed: bool,
}

impl BodyReader<'_> {
    /// The response being received.
    pub fn response(&self) -> &Response {
        self.response
    }

    /// The response status code, for deciding whether the body is worth
    /// reading.
    pub fn status(&self) -> Result<u16, Error> {
        self.response.status()
    }

    /// Read de-framed body payload into `buf`, returning how many bytes were
    /// written. `Ok(0)` after the message completes.
    ///
    /// May be called repeatedly; successive calls see monotonically advancing
    /// body bytes. A receive timeout returns the partial read and ends the
    /// body loop; the connection flush drains whatever remains.
    ///
    /// # Errors
    ///
    /// * [`Error::NetworkError`] on a transport failure.
    /// * [`Error::Parsing`] on malformed body framing.
    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.progressed = true;
        let response = &mut *self.response;
        if response.parser_state >= ParserState::BodyComplete || buf.is_empty() {
            return Ok(0);
        }
        response.buffer_state = BufferState::FillingBody;
        let mut pos = 0;

        // Body bytes that arrived with the head come first.
        while response.prefix_len > 0 && pos < buf.len() {
            let Response {
                headers,
                decoder,
                prefix_start,
                prefix_len,
                ..
            } = response;
            let Some(decoder) = decoder.as_mut() else {
                return Err(Error::InternalError);
            };
            let chunk = headers.slice(*prefix_start, *prefix_len);
            let consumed = match decoder.feed(chunk, Some((&mut *buf, &mut pos))) {
                Ok(consumed) => consumed,
                Err(e) => {
                    response.body_rx_status = Some(e);
                    return Err(e);
                }
            };
            *prefix_start += consumed;
            *prefix_len -= consumed;
            if consumed == 0 {
                break; // buf is full; the rest stays for the next call
            }
        }

        // Then the network, each read bounded by the room left in `buf` so
        // the decoder never has to hold payload back.
        let mut rx_status = None;
        loop {
            let complete = response.decoder_complete();
            if complete || pos >= buf.len() {
                break;
            }
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            let mut scratch = [0u8; RECV_SCRATCH];
            let want = scratch.len().min(buf.len() - pos);
            match self.io.recv_some(&mut scratch[..want]) {
                Ok(n) => {
                    let Some(decoder) = response.decoder.as_mut() else {
                        return Err(Error::InternalError);
                    };
                    if let Err(e) = decoder.feed(&scratch[..n], Some((&mut *buf, &mut pos))) {
                        response.body_rx_status = Some(e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    if !response.finish_on_eof() {
                        rx_status = Some(e);
                    }
                    break;
                }
            }
        }

        if response.decoder_complete() {
            response.parser_state = ParserState::BodyComplete;
        } else if pos > 0 {
            response.parser_state = response.parser_state.max(ParserState::InBody);
        }
        response.body_rx_status = rx_status;
        match rx_status {
            None | Some(Error::Timeout) => Ok(pos),
            Some(e) => {
                log::error!("network error while receiving the response body: {e}");
                Err(e)
            }
        }
    }
}
