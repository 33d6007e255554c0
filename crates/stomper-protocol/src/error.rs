//! Error types for the protocol layer.
//!
//! Every variant describes a byte stream that can't be parsed (or a frame
//! that can't be written). Once the decoder reports one of these the stream
//! offset is lost, so callers treat them as fatal to the connection.

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A header line has no unescaped colon separating key and value.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// A backslash was followed by something other than `\`, `n`, `r` or `c`,
    /// or ended the line.
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    /// The command line or a header line is not valid UTF-8.
    #[error("frame head is not valid UTF-8")]
    InvalidUtf8,

    /// The `content-length` header is not a non-negative integer.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// A length-delimited body was not followed by the NUL terminator.
    #[error("missing frame terminator after {0}-byte body")]
    MissingTerminator(usize),

    /// A command or header line grew past the configured limit without a
    /// line feed.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame")]
    Truncated,

    /// A command that can't be put on the wire (empty, or containing a line
    /// break or NUL).
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),
}
