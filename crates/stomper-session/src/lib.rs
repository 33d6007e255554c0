//! Per-connection frame engine for stomper.
//!
//! A [`SessionHandle`] owns one transport connection. It runs a reader task
//! (bytes → [`FrameDecoder`](stomper_protocol::FrameDecoder) → dispatch) and a
//! writer task (encoded frames → transport), tracks the connection's
//! [`SessionState`], and is the single place where a connection is torn down.
//!
//! The engine is role-agnostic. What a frame *means* is decided by a
//! [`Dispatch`] implementation; the `stomper` crate provides one for the
//! client and one for the server.
//!
//! # Key types
//!
//! - [`SessionHandle`] — cheap-to-clone handle to a running connection
//! - [`OutboundFrame`] — a frame being written: head sent, body streaming
//! - [`InboundFrame`] — a received frame: head parsed, body arriving
//! - [`Dispatch`] — hook invoked for every arriving frame head
//! - [`SessionConfig`] — queue depths and decoder limits

mod config;
mod error;
mod inbound;
mod listener;
mod outbound;
mod session;
mod state;

pub use config::SessionConfig;
pub use error::SessionError;
pub use inbound::InboundFrame;
pub use listener::Listeners;
pub use outbound::{FrameReservation, OutboundFrame};
pub use session::{Dispatch, SessionHandle};
pub use state::SessionState;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, ignoring poisoning.
///
/// Everything guarded this way is plain bookkeeping that stays consistent
/// even if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
