//! Frame encoding.
//!
//! ```text
//! COMMAND\n
//! key:value\n        (zero or more, escaped, insertion order)
//! \n
//! <body bytes>
//! \0
//! ```
//!
//! The head is encoded on its own so callers can stream the body afterwards
//! and finish with [`FRAME_TERMINATOR`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::escape::escape;
use crate::{FrameHead, ProtocolError};

/// The sentinel byte ending every frame.
pub const FRAME_TERMINATOR: u8 = 0;

/// Appends the encoded head (command line, headers, blank line) to `dst`.
///
/// # Errors
/// [`ProtocolError::InvalidCommand`] if the command is empty or contains a
/// line break or NUL.
pub fn encode_head(head: &FrameHead, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let command = head.command.as_str();
    if command.is_empty() || command.contains(['\n', '\r', '\0']) {
        return Err(ProtocolError::InvalidCommand(command.to_string()));
    }

    let estimate = command.len()
        + 2
        + head
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>();
    dst.reserve(estimate);

    dst.put_slice(command.as_bytes());
    dst.put_u8(b'\n');
    for (key, value) in head.headers.iter() {
        dst.put_slice(escape(key).as_bytes());
        dst.put_u8(b':');
        dst.put_slice(escape(value).as_bytes());
        dst.put_u8(b'\n');
    }
    dst.put_u8(b'\n');
    Ok(())
}

/// Encodes a complete frame with an in-memory body.
pub fn encode_frame(head: &FrameHead, body: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(body.len() + 64);
    encode_head(head, &mut buf)?;
    buf.put_slice(body);
    buf.put_u8(FRAME_TERMINATOR);
    Ok(buf.freeze())
}
