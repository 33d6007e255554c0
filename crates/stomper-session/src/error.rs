//! Error types for the frame engine.

use std::sync::Arc;

use stomper_protocol::{HeaderBag, ProtocolError};
use stomper_transport::TransportError;

use crate::SessionState;

/// Errors raised by a connection's engine.
///
/// `Clone` because one error is fanned out to every error listener and to
/// every pending operation when a connection goes down. The transport error
/// is kept behind an `Arc` for that reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The byte stream couldn't be decoded. Fatal to the connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport failed underneath us. Fatal to the connection.
    #[error(transparent)]
    Transport(Arc<TransportError>),

    /// A frame arrived with a command this side doesn't handle.
    #[error("unknown command")]
    UnknownCommand(String),

    /// The peer sent an ERROR frame.
    #[error("{message}")]
    Remote { message: String, headers: HeaderBag },

    /// A frame arrived that isn't allowed in the current state.
    #[error("unexpected {command} frame while {state:?}")]
    UnexpectedFrame { command: String, state: SessionState },

    /// The connection was destroyed locally with this reason.
    #[error("{0}")]
    Aborted(String),

    /// The connection was destroyed locally without a reason.
    #[error("unknown error")]
    Unknown,

    /// The peer closed the transport outside a clean disconnect.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection has already been torn down.
    #[error("connection destroyed")]
    Destroyed,

    /// The operation needs a connected session.
    #[error("not connected (state: {0:?})")]
    NotConnected(SessionState),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Write or end on a frame whose body was already ended.
    #[error("frame body already ended")]
    FrameEnded,

    /// The written body disagrees with the declared `content-length`.
    #[error("body length mismatch: declared {declared}, wrote {written}")]
    BodyLength { declared: usize, written: usize },

    /// The connection went away before the inbound body ended.
    #[error("frame body truncated")]
    BodyTruncated,
}

impl SessionError {
    /// A local destroy reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        Self::Transport(Arc::new(err))
    }
}
