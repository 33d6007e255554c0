//! Shared fixtures for the facade integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use stomper::prelude::*;
use stomper::protocol::{DecodeEvent, FrameDecoder};
use stomper::transport::{MemoryConnection, memory};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

/// A frame as a handler saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub command: String,
    pub headers: HeaderBag,
    pub body: Bytes,
}

/// Server handler that reports every frame it handles.
#[derive(Clone)]
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Seen>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    async fn record(&self, mut frame: InboundFrame, responder: Responder) -> Result<(), StompError> {
        let body = frame.read_to_end().await?;
        let _ = self.tx.send(Seen {
            command: frame.command().to_string(),
            headers: frame.headers().clone(),
            body,
        });
        responder.respond().await
    }
}

impl ServerHandler for RecordingHandler {
    async fn on_connect(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await
    }

    async fn on_send(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await
    }

    async fn on_subscribe(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await
    }

    async fn on_unsubscribe(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await
    }

    async fn on_ack(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await
    }

    async fn on_nack(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await
    }

    async fn on_disconnect(
        &self,
        conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        self.record(frame, responder).await?;
        conn.close().await;
        Ok(())
    }
}

/// A connected client/server pair over an in-memory transport.
pub struct Fixture {
    pub client: Client,
    pub server: ServerConnection,
    pub seen: mpsc::UnboundedReceiver<Seen>,
    pub client_errors: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    pub async fn connected() -> Self {
        Self::connected_with(ClientConfig::default()).await
    }

    pub async fn connected_with(config: ClientConfig) -> Self {
        let (client_end, server_end) = memory::pair();
        let (handler, seen) = RecordingHandler::new();
        let server = ServerConnection::accept(server_end, Arc::new(handler));
        let client = Client::with_config(client_end, config);
        let client_errors = error_log(|f| client.on_error(f));

        timeout(WAIT, client.connect("localhost"))
            .await
            .expect("connect timed out")
            .expect("connect");

        let mut fixture = Self {
            client,
            server,
            seen,
            client_errors,
        };
        assert_eq!(fixture.next_seen().await.command, "CONNECT");
        fixture
    }

    /// Next frame the server handler saw.
    pub async fn next_seen(&mut self) -> Seen {
        timeout(WAIT, self.seen.recv())
            .await
            .expect("timed out waiting for the server handler")
            .expect("handler channel closed")
    }

    /// Server-handler frames up to and including the first `command`.
    pub async fn seen_until(&mut self, command: &str) -> Vec<Seen> {
        let mut out = Vec::new();
        loop {
            let seen = self.next_seen().await;
            let done = seen.command == command;
            out.push(seen);
            if done {
                return out;
            }
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.client_errors.lock().unwrap().clone()
    }
}

/// Registers an error listener through `register` and returns its log.
pub fn error_log(
    register: impl FnOnce(Box<dyn Fn(&SessionError) + Send + Sync>),
) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    register(Box::new(move |e: &SessionError| {
        sink.lock().unwrap().push(e.to_string())
    }));
    log
}

/// Pushes a MESSAGE for `subscription` from the server side.
pub async fn send_message(server: &ServerConnection, subscription: &str, message_id: &str, body: &str) {
    let headers = HeaderBag::new()
        .with(header::DESTINATION, "/queue/test")
        .with(header::SUBSCRIPTION, subscription)
        .with(header::MESSAGE_ID, message_id);
    let mut frame = server.send_frame("MESSAGE", headers).await.unwrap();
    frame.end_with(body.to_string()).await.unwrap();
}

/// Polls `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// The far end of a connection, driven with raw bytes and decoded with
/// the protocol crate's decoder.
pub struct RawPeer {
    pub conn: MemoryConnection,
    decoder: FrameDecoder,
    current: Option<(FrameHead, Vec<u8>)>,
    ready: VecDeque<(FrameHead, Vec<u8>)>,
}

impl RawPeer {
    pub fn new(conn: MemoryConnection) -> Self {
        Self {
            conn,
            decoder: FrameDecoder::new(),
            current: None,
            ready: VecDeque::new(),
        }
    }

    pub async fn send(&self, bytes: &[u8]) {
        self.conn.send(bytes).await.unwrap();
    }

    /// Next complete frame, or `None` once the stream has ended.
    pub async fn next_frame(&mut self) -> Option<(FrameHead, Vec<u8>)> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(frame);
            }
            let data = timeout(WAIT, self.conn.recv())
                .await
                .expect("timed out waiting for bytes")
                .expect("recv failed")?;
            for event in self.decoder.feed(&data).expect("peer sent undecodable bytes") {
                match event {
                    DecodeEvent::Head(head) => self.current = Some((head, Vec::new())),
                    DecodeEvent::Body(chunk) => {
                        if let Some((_, body)) = &mut self.current {
                            body.extend_from_slice(&chunk);
                        }
                    }
                    DecodeEvent::End => {
                        if let Some(frame) = self.current.take() {
                            self.ready.push_back(frame);
                        }
                    }
                }
            }
        }
    }

    /// Next frame, asserting its command.
    pub async fn expect_frame(&mut self, command: &str) -> (FrameHead, Vec<u8>) {
        let frame = self.next_frame().await.expect("stream ended");
        assert_eq!(frame.0.command, command, "unexpected frame: {:?}", frame.0);
        frame
    }
}
