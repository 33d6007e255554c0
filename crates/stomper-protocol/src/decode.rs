//! Streaming frame decoder.
//!
//! Socket reads arrive in arbitrary chunks: half a command line, a header
//! block split mid-escape, three frames at once. [`FrameDecoder`] buffers
//! whatever it can't use yet and resumes exactly where it stopped on the
//! next [`feed`](FrameDecoder::feed).
//!
//! Decoding doesn't wait for whole frames. As soon as the header block is
//! complete a [`DecodeEvent::Head`] is produced, then body bytes flow out as
//! [`DecodeEvent::Body`] chunks as they arrive, then [`DecodeEvent::End`].
//! A large body never has to sit in memory in one piece.
//!
//! ```text
//!            LF (non-empty)            blank line
//! Command ──────────────────→ Headers ────────────→ Body ──┐
//!    ↑  └─ blank line: heartbeat,                    │     │ content-length
//!    │     skipped                                   │     ↓ bytes consumed
//!    │                                    NUL found  │  Terminator
//!    └───────────────────────────────────────────────┴─────┘ NUL
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::escape::unescape;
use crate::{FrameHead, HeaderBag, ProtocolError};

/// Default limit for a single command or header line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Something the decoder produced from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A frame's command and headers are complete.
    Head(FrameHead),
    /// The next slice of the current frame's body.
    Body(Bytes),
    /// The current frame's body is complete.
    End,
}

#[derive(Debug)]
enum State {
    /// Waiting for a command line (blank lines are heartbeats).
    Command,
    /// Reading header lines until the blank separator.
    Headers { command: String, headers: HeaderBag },
    /// Reading the body. `remaining` is `Some` when `content-length` was
    /// given, otherwise we scan for the terminator.
    Body {
        remaining: Option<usize>,
        declared: usize,
    },
    /// Length-delimited body done; the NUL must come next.
    Terminator { declared: usize },
}

/// Incremental decoder for one inbound byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: State,
    /// How far into `buffer` we already searched for a line feed.
    scanned: usize,
    max_line_length: usize,
}

enum Step {
    Emit(DecodeEvent),
    Continue,
    NeedMore,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::Command,
            scanned: 0,
            max_line_length,
        }
    }

    /// Adds bytes from the stream and returns every event they complete.
    ///
    /// # Errors
    /// Any [`ProtocolError`] here means the stream is unusable; the decoder
    /// must not be fed again.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<DecodeEvent>, ProtocolError> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        loop {
            match self.step()? {
                Step::Emit(event) => events.push(event),
                Step::Continue => {}
                Step::NeedMore => break,
            }
        }
        Ok(events)
    }

    /// Checks that the stream may end here.
    ///
    /// # Errors
    /// [`ProtocolError::Truncated`] if a frame was started but not finished.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        let idle = matches!(self.state, State::Command)
            && self.buffer.iter().all(|b| matches!(b, b'\n' | b'\r'));
        if idle {
            Ok(())
        } else {
            Err(ProtocolError::Truncated)
        }
    }

    /// Whether the decoder sits between frames.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Command) && self.buffer.is_empty()
    }

    fn step(&mut self) -> Result<Step, ProtocolError> {
        match &mut self.state {
            State::Command => {
                let Some(line) = self.take_line()? else {
                    return Ok(Step::NeedMore);
                };
                if line.is_empty() {
                    tracing::trace!("heartbeat");
                    return Ok(Step::Continue);
                }
                let command = std::str::from_utf8(&line)
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                self.state = State::Headers {
                    command,
                    headers: HeaderBag::new(),
                };
                Ok(Step::Continue)
            }

            State::Headers { .. } => {
                let Some(line) = self.take_line()? else {
                    return Ok(Step::NeedMore);
                };
                if !line.is_empty() {
                    let (key, value) = parse_header_line(&line)?;
                    if let State::Headers { headers, .. } = &mut self.state {
                        headers.set(key, value);
                    }
                    return Ok(Step::Continue);
                }

                let State::Headers { command, headers } =
                    std::mem::replace(&mut self.state, State::Command)
                else {
                    return Ok(Step::Continue);
                };
                let remaining = headers.content_length()?;
                self.state = State::Body {
                    remaining,
                    declared: remaining.unwrap_or(0),
                };
                Ok(Step::Emit(DecodeEvent::Head(FrameHead { command, headers })))
            }

            State::Body {
                remaining: Some(remaining),
                declared,
            } => {
                if *remaining == 0 {
                    self.state = State::Terminator {
                        declared: *declared,
                    };
                    return Ok(Step::Continue);
                }
                if self.buffer.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let take = (*remaining).min(self.buffer.len());
                *remaining -= take;
                let chunk = self.buffer.split_to(take).freeze();
                Ok(Step::Emit(DecodeEvent::Body(chunk)))
            }

            State::Body {
                remaining: None, ..
            } => {
                if self.buffer.is_empty() {
                    return Ok(Step::NeedMore);
                }
                match self.buffer.iter().position(|&b| b == crate::FRAME_TERMINATOR) {
                    Some(0) => {
                        self.buffer.advance(1);
                        self.state = State::Command;
                        Ok(Step::Emit(DecodeEvent::End))
                    }
                    Some(pos) => {
                        let chunk = self.buffer.split_to(pos).freeze();
                        Ok(Step::Emit(DecodeEvent::Body(chunk)))
                    }
                    None => {
                        let chunk = self.buffer.split().freeze();
                        Ok(Step::Emit(DecodeEvent::Body(chunk)))
                    }
                }
            }

            State::Terminator { declared } => {
                let Some(&first) = self.buffer.first() else {
                    return Ok(Step::NeedMore);
                };
                if first != crate::FRAME_TERMINATOR {
                    return Err(ProtocolError::MissingTerminator(*declared));
                }
                self.buffer.advance(1);
                self.state = State::Command;
                Ok(Step::Emit(DecodeEvent::End))
            }
        }
    }

    /// Removes one line (without its LF and optional CR) from the buffer.
    fn take_line(&mut self) -> Result<Option<BytesMut>, ProtocolError> {
        let start = self.scanned;
        match self.buffer[start..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = start + offset;
                let mut line = self.buffer.split_to(end + 1);
                self.scanned = 0;
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                if line.len() > self.max_line_length {
                    return Err(ProtocolError::LineTooLong(self.max_line_length));
                }
                Ok(Some(line))
            }
            None => {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_line_length {
                    return Err(ProtocolError::LineTooLong(self.max_line_length));
                }
                Ok(None)
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `key:value` at the first unescaped colon and unescapes both sides.
fn parse_header_line(line: &[u8]) -> Result<(String, String), ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;

    let mut colon = None;
    let mut bytes = text.bytes().enumerate();
    while let Some((i, b)) = bytes.next() {
        match b {
            b'\\' => {
                bytes.next();
            }
            b':' => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon.ok_or_else(|| ProtocolError::MalformedHeader(text.to_string()))?;

    let key = unescape(&text[..colon])?.into_owned();
    let value = unescape(&text[colon + 1..])?.into_owned();
    Ok((key, value))
}
