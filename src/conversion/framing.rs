//! Line framing for converter progress output.
//!
//! Progress bars redraw themselves by ending a line with a bare `\r`
//! instead of `\n`. [`ProgressLineCodec`] splits the byte stream into lines
//! and marks the ones that end in a redraw, so the caller can surface the
//! difference instead of forwarding raw bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Lines longer than this are split into several frames.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// One decoded line of converter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub text: String,
    /// The line was ended by a bare `\r`: the next line replaces it.
    pub redraw: bool,
}

impl Frame {
    fn new(bytes: &[u8], redraw: bool) -> Self {
        Self {
            text: String::from_utf8_lossy(bytes).into_owned(),
            redraw,
        }
    }
}

/// Decoder splitting on `\n`, `\r\n` and bare `\r`.
///
/// A `\r` that ends the buffer is reported as a redraw straight away, so a
/// progress bar that pauses after redrawing is not held back; a `\n`
/// arriving right after it is then skipped. Invalid UTF-8 is replaced rather
/// than rejected, and a partial last line is flushed when the stream ends.
#[derive(Debug, Clone)]
pub struct ProgressLineCodec {
    max_length: usize,
    /// Bytes of the buffer already known to hold no terminator
    next_index: usize,
    /// The last frame ended in a `\r` at the end of the buffer
    skip_newline: bool,
}

impl ProgressLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
            skip_newline: false,
        }
    }

    fn split_overlong(&mut self, buf: &mut BytesMut) -> Frame {
        self.next_index = 0;
        let chunk = buf.split_to(self.max_length);
        Frame::new(&chunk, false)
    }
}

impl Default for ProgressLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ProgressLineCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if self.skip_newline && !buf.is_empty() {
            self.skip_newline = false;
            if buf[0] == b'\n' {
                buf.advance(1);
            }
        }

        let terminator = buf[self.next_index..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
            .map(|offset| self.next_index + offset);

        let Some(end) = terminator else {
            if buf.len() > self.max_length {
                return Ok(Some(self.split_overlong(buf)));
            }
            self.next_index = buf.len();
            return Ok(None);
        };

        if end > self.max_length {
            return Ok(Some(self.split_overlong(buf)));
        }

        if buf[end] == b'\r' {
            self.next_index = 0;
            let line = buf.split_to(end);
            match buf.get(1) {
                Some(b'\n') => {
                    buf.advance(2);
                    return Ok(Some(Frame::new(&line, false)));
                }
                Some(_) => buf.advance(1),
                None => {
                    // Possibly the first half of a `\r\n` split across reads
                    buf.advance(1);
                    self.skip_newline = true;
                }
            }
            return Ok(Some(Frame::new(&line, true)));
        }

        self.next_index = 0;
        let line = buf.split_to(end);
        buf.advance(1);
        Ok(Some(Frame::new(&line, false)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }

        let frame = Frame::new(buf, false);
        buf.clear();
        Ok(Some(frame))
    }
}
