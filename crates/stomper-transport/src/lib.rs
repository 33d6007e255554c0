//! Transport abstraction layer for stomper.
//!
//! The frame engine only needs a duplex byte stream: write bytes, receive
//! whatever bytes arrived, learn that the peer closed, and force-close. The
//! [`Connection`] trait captures exactly that. [`Transport`] accepts new
//! connections for a server loop.
//!
//! Nothing here knows about frames. Reads return arbitrary chunks (a read may
//! contain half a frame or three frames); reassembly is the codec's job.
//!
//! # Implementations
//!
//! - [`StreamConnection`] — any tokio `AsyncRead + AsyncWrite` stream
//! - [`TcpTransport`] / [`connect_tcp`] — plain TCP
//! - [`memory::pair`] — two connected in-memory endpoints (tests, demos)
//! - `WebSocketTransport` / `WebSocketConnection` — STOMP over WebSocket
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

mod error;
pub mod memory;
mod shutdown;
mod stream;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::MemoryConnection;
pub use shutdown::ShutdownSignal;
pub use stream::{StreamConnection, TcpTransport, connect_tcp};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    /// Pending and later `accept` calls fail with
    /// [`TransportError::Shutdown`].
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A duplex byte stream.
///
/// `send` and `recv` take `&self` so one task can block in `recv` while
/// another writes; implementations keep the two directions independent.
pub trait Connection: Send + Sync + 'static {
    /// Writes bytes to the remote peer. Resolves once the transport has
    /// accepted them (this is where write backpressure is felt).
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next chunk of bytes from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer closed the stream.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the write side of the connection; the peer observes end of
    /// stream.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }
}
