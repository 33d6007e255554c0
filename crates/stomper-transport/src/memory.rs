//! In-memory connection pairs.
//!
//! Two endpoints joined by a `tokio::io::duplex` pipe: bytes sent on one
//! side arrive on the other, and closing one side shows up as end of stream
//! on its peer. Used by tests and the loopback demo.

use tokio::io::DuplexStream;

use crate::StreamConnection;

/// Default pipe capacity per direction.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// One end of an in-memory pair.
pub type MemoryConnection = StreamConnection<DuplexStream>;

/// Creates a connected pair with the default capacity.
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    pair_with_capacity(DEFAULT_PIPE_CAPACITY)
}

/// Creates a connected pair whose pipe buffers at most `capacity` bytes per
/// direction. Small capacities make write backpressure observable.
pub fn pair_with_capacity(capacity: usize) -> (MemoryConnection, MemoryConnection) {
    let (a, b) = tokio::io::duplex(capacity.max(1));
    (StreamConnection::new(a), StreamConnection::new(b))
}
