//! Integration tests for the WebSocket transport.
//!
//! A real listener on an OS-assigned port, a real client, and bytes flowing
//! both ways at the same time.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use stomper_transport::{
        Connection, Transport, TransportError, WebSocketConnection, WebSocketTransport,
    };

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, addr) = bind().await;

        let server_handle =
            tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let client = WebSocketConnection::connect(&format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let server = server_handle.await.expect("task should complete");

        assert!(server.id().into_inner() > 0);
        assert_ne!(server.id(), client.id());

        server.send(b"hello from server").await.expect("send");
        let got = client.recv().await.expect("recv").expect("data");
        assert_eq!(got, b"hello from server");

        client.send(b"hello from client").await.expect("send");
        let got = server.recv().await.expect("recv").expect("data");
        assert_eq!(got, b"hello from client");
    }

    #[tokio::test]
    async fn test_websocket_send_is_not_blocked_by_pending_recv() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = std::sync::Arc::new(
            WebSocketConnection::connect(&format!("ws://{addr}")).await.unwrap(),
        );
        let server = server_handle.await.unwrap();

        // Park a reader on the client, then write from the same client.
        let reader = std::sync::Arc::clone(&client);
        let pending = tokio::spawn(async move { reader.recv().await });

        tokio::time::timeout(Duration::from_secs(2), client.send(b"ping"))
            .await
            .expect("send must not wait for recv")
            .unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"ping");

        server.send(b"pong").await.unwrap();
        let got = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(got, b"pong");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_peer_close() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = WebSocketConnection::connect(&format!("ws://{addr}")).await.unwrap();
        let server = server_handle.await.unwrap();

        client.close().await.unwrap();

        let result = server.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on peer close");
    }

    #[tokio::test]
    async fn test_websocket_shutdown_stops_pending_accept() {
        let (mut transport, _addr) = bind().await;
        let stop = transport.shutdown_signal();
        let pending = tokio::spawn(async move { transport.accept().await });

        stop.trigger();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("accept should stop")
            .expect("task should complete");
        assert!(matches!(result, Err(TransportError::Shutdown)));
    }
}
