//! Wire protocol for stomper.
//!
//! This crate knows what frames look like on the wire and nothing else:
//!
//! - **Frame model** ([`FrameHead`], [`HeaderBag`], [`Command`])
//! - **Encoding** ([`encode_head`], [`encode_frame`]) — head first, body
//!   bytes streamed by the caller, then [`FRAME_TERMINATOR`]
//! - **Decoding** ([`FrameDecoder`]) — incremental, emits
//!   [`DecodeEvent`]s as bytes arrive
//! - **Errors** ([`ProtocolError`])
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (FrameHead + body chunks) → Session (state, dispatch)
//! ```

mod command;
mod decode;
mod encode;
mod error;
pub mod escape;
mod frame;
mod headers;

pub use command::Command;
pub use decode::{DEFAULT_MAX_LINE_LENGTH, DecodeEvent, FrameDecoder};
pub use encode::{FRAME_TERMINATOR, encode_frame, encode_head};
pub use error::ProtocolError;
pub use frame::FrameHead;
pub use headers::{HeaderBag, names as header};
