use crate::codec::{FrameCodec, FRAME_TERMINATOR};
use crate::frame::{parse_length, Frame};
use crate::ring::RingBuffer;
use crate::{ProtocolError, Result};
use tracing::{debug, trace};

/// Default receive buffer size in bytes
pub const DEFAULT_RX_BUFFER_SIZE: usize = 16 * 1024;

const CONTENT_LENGTH_PREFIX: &[u8] = b"content-length:";

/// Where the reader is in assembling the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Nothing buffered
    Idle,
    /// Bytes buffered but no complete header block yet
    AwaitingHeader,
    /// Headers declare a body of known length; `needed` bytes in total
    AwaitingBody { needed: usize },
    /// The last call produced a frame
    Dispatching,
}

/// Reassembles frames from stream bytes that arrive fragmented or batched.
///
/// Bytes are buffered in a fixed-size ring, so the largest frame the reader
/// can ever assemble is its capacity.
pub struct FrameReader {
    buffer: RingBuffer<u8>,
    codec: FrameCodec,
    state: ReaderState,
}

impl FrameReader {
    pub fn new(capacity: usize, codec: FrameCodec) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            codec,
            state: ReaderState::Idle,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Room left for incoming bytes
    pub fn available_write(&self) -> usize {
        self.buffer.available_write()
    }

    /// Bytes buffered and not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.available_read()
    }

    /// True when the buffer is full, so a pending frame can never complete
    pub fn is_exhausted(&self) -> bool {
        self.buffer.available_write() == 0
    }

    /// Appends bytes read from the stream
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.write(data)?;
        trace!("Buffered {} bytes ({} pending)", data.len(), self.buffered());
        Ok(())
    }

    /// Skips heartbeats and frame separators at the read position
    pub fn skip_separators(&mut self) -> usize {
        let mut skipped = 0;
        while let Some(b'\r' | b'\n' | FRAME_TERMINATOR) = self.buffer.peek() {
            // peek() returned Some, so one element is readable
            if self.buffer.skip(1).is_err() {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            trace!("Skipped {} separator bytes", skipped);
        }
        skipped
    }

    /// Extracts the next complete frame, if one is buffered.
    ///
    /// Frames without a `content-length` header end at the first
    /// terminator. Frames with one end after exactly that many body bytes,
    /// even if the body contains terminator bytes. Bytes of a frame that
    /// fails to parse are consumed before the error is returned.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.skip_separators();

        let Some(length) = self.buffer.distance_to(FRAME_TERMINATOR) else {
            self.state = if self.buffer.available_read() == 0 {
                ReaderState::Idle
            } else {
                ReaderState::AwaitingHeader
            };
            return Ok(None);
        };

        let span = self.buffer.peek_slice(length)?;

        let scan = match scan_headers(&span) {
            Ok(Some(scan)) => scan,
            Ok(None) => {
                self.state = ReaderState::AwaitingHeader;
                return Ok(None);
            }
            Err(e) => {
                self.buffer.skip(length)?;
                self.state = ReaderState::Idle;
                return Err(e);
            }
        };

        let (frame_len, data) = match scan.content_length {
            None => (length, span),
            Some(body_len) => {
                let Some(needed) = scan.header_len.checked_add(body_len) else {
                    self.buffer.skip(length)?;
                    self.state = ReaderState::Idle;
                    return Err(ProtocolError::malformed(
                        "content-length",
                        format!("{} is out of range", body_len),
                    ));
                };
                if needed > self.buffer.available_read() {
                    trace!("Waiting for {} bytes, have {}", needed, self.buffered());
                    self.state = ReaderState::AwaitingBody { needed };
                    return Ok(None);
                }
                (needed, self.buffer.peek_slice(needed)?)
            }
        };

        self.buffer.skip(frame_len)?;
        self.state = ReaderState::Dispatching;
        debug!("Extracted frame of {} bytes", frame_len);

        self.codec.parse(&data).map(Some)
    }
}

struct HeaderScan {
    /// Bytes up to and including the blank line ending the headers
    header_len: usize,
    content_length: Option<usize>,
}

/// Finds the end of the header block and any `content-length` before it
fn scan_headers(span: &[u8]) -> Result<Option<HeaderScan>> {
    let mut content_length = None;
    let mut pos = 0;
    let mut first = true;

    while let Some(end) = span[pos..].iter().position(|&b| b == b'\n') {
        let raw = &span[pos..pos + end];
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        pos += end + 1;

        // A blank line before the command is a stray separator, not the end
        if line.is_empty() && !first {
            return Ok(Some(HeaderScan {
                header_len: pos,
                content_length,
            }));
        }

        if let Some(value) = line.strip_prefix(CONTENT_LENGTH_PREFIX) {
            if content_length.is_none() && !first {
                let value = String::from_utf8_lossy(value);
                content_length = Some(parse_length("content-length", &value)?);
            }
        }

        if !line.is_empty() {
            first = false;
        }
    }

    Ok(None)
}
