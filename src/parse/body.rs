//! Response body framing decoder.
//!
//! After the response head completes, the remaining stream is one of four
//! framings: a `Content-Length`-delimited body, a chunked body, a body that
//! runs until the connection closes, or no body at all (HEAD and the
//! body-less status codes). The decoder consumes raw stream bytes from any
//! source, whether the tail of the header buffer or fresh network reads, and
//! emits de-framed, contiguous payload into the destination region. Chunk
//! framing and trailers are consumed and never exposed.

use crate::error::Error;

/// Longest tolerated chunk-size line (hex size plus extensions plus CRLF)
/// when it splits across reads.
const CHUNK_SPILL: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body on the wire.
    Skip,
    /// Exactly `remaining` payload bytes follow the head.
    ContentLength,
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Payload runs until the peer closes the connection.
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    /// Expecting a chunk-size line.
    Size,
    /// Consuming `remaining` bytes of chunk payload.
    Data,
    /// Expecting the `\r` after chunk payload.
    DataCr,
    /// Expecting the `\n` after chunk payload.
    DataLf,
    /// Consuming trailer lines; `line_blank` tracks whether the current line
    /// is still empty.
    Trailer { line_blank: bool },
}

/// Incremental decoder for one response body.
#[derive(Debug)]
pub(crate) struct BodyDecoder {
    framing: Framing,
    remaining: u64,
    phase: ChunkPhase,
    spill: heapless::Vec<u8, CHUNK_SPILL>,
    complete: bool,
    started: bool,
}

impl BodyDecoder {
    /// No body follows the head.
    pub(crate) fn skip() -> Self {
        Self::with(Framing::Skip, 0, true)
    }

    /// A body of exactly `len` bytes follows the head.
    pub(crate) fn content_length(len: u64) -> Self {
        Self::with(Framing::ContentLength, len, len == 0)
    }

    /// A chunked body follows the head.
    pub(crate) fn chunked() -> Self {
        Self::with(Framing::Chunked, 0, false)
    }

    /// The body runs until the connection closes.
    pub(crate) fn until_close() -> Self {
        Self::with(Framing::UntilClose, 0, false)
    }

    fn with(framing: Framing, remaining: u64, complete: bool) -> Self {
        Self {
            framing,
            remaining,
            phase: ChunkPhase::Size,
            spill: heapless::Vec::new(),
            complete,
            started: false,
        }
    }

    /// Whether the end of the message has been reached.
    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether any payload byte has been seen.
    pub(crate) fn started(&self) -> bool {
        self.started
    }

    /// The peer closed the stream (or the receive window elapsed with the
    /// stream idle). Completes an until-close body; anything else stays
    /// incomplete. Returns whether the message is now complete.
    pub(crate) fn finish_on_eof(&mut self) -> bool {
        if self.framing == Framing::UntilClose {
            self.complete = true;
        }
        self.complete
    }

    /// Consume raw stream bytes, writing de-framed payload to `out`.
    ///
    /// `out` is `(destination, write position)`; `None` discards payload
    /// (flush, or a sync exchange without a body buffer). Returns how many
    /// input bytes were consumed. Payload is never dropped when `out` is
    /// present: once the destination is full the decoder stops consuming, so
    /// the caller can hand the remainder to a later destination.
    pub(crate) fn feed(
        &mut self,
        mut input: &[u8],
        mut out: Option<(&mut [u8], &mut usize)>,
    ) -> Result<usize, Error> {
        let total = input.len();
        loop {
            if self.complete {
                // Pipelining is unsupported, so bytes past the end of the
                // message can only be stream debris; tolerate and drop them.
                if !input.is_empty() {
                    log::debug!("ignoring {} bytes past the end of the message", input.len());
                    input = &input[input.len()..];
                }
                break;
            }
            if input.is_empty() {
                break;
            }
            match self.framing {
                Framing::Skip => break,
                Framing::ContentLength => {
                    let want = self.remaining.min(input.len() as u64) as usize;
                    let moved = self.emit(&input[..want], &mut out);
                    self.remaining -= moved as u64;
                    input = &input[moved..];
                    if self.remaining == 0 {
                        self.complete = true;
                    } else if moved < want {
                        break; // destination full
                    }
                }
                Framing::UntilClose => {
                    let moved = self.emit(input, &mut out);
                    input = &input[moved..];
                    if !input.is_empty() {
                        break; // destination full
                    }
                }
                Framing::Chunked => match self.phase {
                    ChunkPhase::Size => {
                        input = self.take_chunk_size(input)?;
                    }
                    ChunkPhase::Data => {
                        let want = self.remaining.min(input.len() as u64) as usize;
                        let moved = self.emit(&input[..want], &mut out);
                        self.remaining -= moved as u64;
                        input = &input[moved..];
                        if self.remaining == 0 {
                            self.phase = ChunkPhase::DataCr;
                        } else if moved < want {
                            break; // destination full
                        }
                    }
                    ChunkPhase::DataCr => {
                        if input[0] != b'\r' {
                            return Err(Error::Parsing);
                        }
                        input = &input[1..];
                        self.phase = ChunkPhase::DataLf;
                    }
                    ChunkPhase::DataLf => {
                        if input[0] != b'\n' {
                            return Err(Error::Parsing);
                        }
                        input = &input[1..];
                        self.phase = ChunkPhase::Size;
                    }
                    ChunkPhase::Trailer { .. } => {
                        input = self.take_trailer(input);
                    }
                },
            }
        }
        Ok(total - input.len())
    }

    /// Move payload toward the destination, returning how much was accepted.
    fn emit(&mut self, data: &[u8], out: &mut Option<(&mut [u8], &mut usize)>) -> usize {
        if data.is_empty() {
            return 0;
        }
        self.started = true;
        match out {
            None => data.len(),
            Some((buf, pos)) => {
                let take = (buf.len() - **pos).min(data.len());
                buf[**pos..**pos + take].copy_from_slice(&data[..take]);
                **pos += take;
                take
            }
        }
    }

    /// Consume a chunk-size line, buffering a split line in the spill.
    fn take_chunk_size<'i>(&mut self, input: &'i [u8]) -> Result<&'i [u8], Error> {
        if self.spill.is_empty() {
            return match httparse::parse_chunk_size(input) {
                Ok(httparse::Status::Complete((consumed, size))) => {
                    self.begin_chunk(size);
                    Ok(&input[consumed..])
                }
                Ok(httparse::Status::Partial) => {
                    if self.spill.extend_from_slice(input).is_err() {
                        log::error!("chunk-size line exceeds {CHUNK_SPILL} bytes");
                        return Err(Error::Parsing);
                    }
                    Ok(&input[input.len()..])
                }
                Err(_) => Err(Error::Parsing),
            };
        }

        // A previous read ended inside the size line; stitch it together.
        let carried = self.spill.len();
        let append = input.len().min(self.spill.capacity() - carried);
        if self.spill.extend_from_slice(&input[..append]).is_err() {
            return Err(Error::Parsing);
        }
        match httparse::parse_chunk_size(&self.spill) {
            Ok(httparse::Status::Complete((consumed, size))) => {
                // The line was partial over the carried bytes alone, so its
                // CRLF must end inside the appended region.
                let consumed_now = consumed - carried;
                self.spill.clear();
                self.begin_chunk(size);
                Ok(&input[consumed_now..])
            }
            Ok(httparse::Status::Partial) => {
                if append < input.len() {
                    log::error!("chunk-size line exceeds {CHUNK_SPILL} bytes");
                    return Err(Error::Parsing);
                }
                Ok(&input[input.len()..])
            }
            Err(_) => Err(Error::Parsing),
        }
    }

    fn begin_chunk(&mut self, size: u64) {
        log::debug!("chunk header: {size} byte chunk");
        if size == 0 {
            self.phase = ChunkPhase::Trailer { line_blank: true };
        } else {
            self.remaining = size;
            self.phase = ChunkPhase::Data;
        }
    }

    /// Consume trailer lines after the zero-size chunk; a blank line ends the
    /// message. Trailer fields themselves are not exposed.
    fn take_trailer<'i>(&mut self, mut input: &'i [u8]) -> &'i [u8] {
        let ChunkPhase::Trailer { mut line_blank } = self.phase else {
            return input;
        };
        while let Some((&byte, rest)) = input.split_first() {
            input = rest;
            match byte {
                b'\r' => {}
                b'\n' => {
                    if line_blank {
                        log::debug!("chunked message complete");
                        self.complete = true;
                        break;
                    }
                    line_blank = true;
                }
                _ => line_blank = false,
            }
        }
        self.phase = ChunkPhase::Trailer { line_blank };
        input
    }
}
