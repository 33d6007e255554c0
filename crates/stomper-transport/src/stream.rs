//! Connections over plain tokio byte streams (TCP, duplex pipes).

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, ShutdownSignal, Transport, TransportError};

/// Default size of a single `recv` read.
const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// A [`Connection`] over any tokio `AsyncRead + AsyncWrite` stream.
///
/// The stream is split so a pending `recv` never blocks `send`.
pub struct StreamConnection<S> {
    id: ConnectionId,
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    read_buffer: usize,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps a stream with the default read buffer size.
    pub fn new(stream: S) -> Self {
        Self::with_read_buffer(stream, DEFAULT_READ_BUFFER)
    }

    /// Wraps a stream, reading at most `read_buffer` bytes per `recv`.
    pub fn with_read_buffer(stream: S, read_buffer: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: ConnectionId::next(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            read_buffer: read_buffer.max(1),
        }
    }
}

impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; self.read_buffer];
        let n = self
            .reader
            .lock()
            .await
            .read(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// A TCP [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
    shutdown: ShutdownSignal,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that stops this transport from anywhere, e.g. after it
    /// moved into a server loop.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

impl Transport for TcpTransport {
    type Connection = StreamConnection<TcpStream>;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        let (stream, addr) = tokio::select! {
            biased;
            () = self.shutdown.triggered() => return Err(TransportError::Shutdown),
            accepted = self.listener.accept() => accepted.map_err(TransportError::AcceptFailed)?,
        };
        stream.set_nodelay(true).map_err(TransportError::AcceptFailed)?;

        let conn = StreamConnection::new(stream);
        tracing::debug!(id = %conn.id(), %addr, "accepted TCP connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.shutdown.trigger();
        tracing::info!("TCP transport shut down");
        Ok(())
    }
}

/// Opens a TCP connection to `addr`.
pub async fn connect_tcp(
    addr: &str,
) -> Result<StreamConnection<TcpStream>, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(TransportError::ConnectFailed)?;
    stream.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
    let conn = StreamConnection::new(stream);
    tracing::debug!(id = %conn.id(), addr, "opened TCP connection");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_respects_read_buffer_size() {
        let (a, b) = tokio::io::duplex(64);
        let a = StreamConnection::with_read_buffer(a, 4);
        let b = StreamConnection::new(b);

        b.send(b"abcdefgh").await.unwrap();

        let first = a.recv().await.unwrap().unwrap();
        assert_eq!(first, b"abcd");
        let second = a.recv().await.unwrap().unwrap();
        assert_eq!(second, b"efgh");
    }

    #[tokio::test]
    async fn test_close_signals_end_of_stream_to_peer() {
        let (a, b) = tokio::io::duplex(64);
        let a = StreamConnection::new(a);
        let b = StreamConnection::new(b);

        a.close().await.unwrap();

        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tcp_connect_and_accept_exchange_bytes() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = connect_tcp(&addr).await.unwrap();
        let server = server.await.unwrap();

        client.send(b"ping").await.unwrap();
        let got = server.recv().await.unwrap().unwrap();
        assert_eq!(got, b"ping");
    }

    #[tokio::test]
    async fn test_accept_after_shutdown_fails() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();

        transport.shutdown().await.unwrap();

        assert!(matches!(transport.accept().await, Err(TransportError::Shutdown)));
    }

    #[tokio::test]
    async fn test_shutdown_signal_wakes_pending_accept() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let stop = transport.shutdown_signal();
        let pending = tokio::spawn(async move { transport.accept().await });

        stop.trigger();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Shutdown)));
    }
}
