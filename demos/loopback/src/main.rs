//! Runs a tiny echo broker and a client against it, first over an
//! in-memory pair and then over TCP.
//!
//! ```text
//! RUST_LOG=debug cargo run -p loopback
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stomper::prelude::*;
use stomper::transport::{ConnectionId, TcpTransport, connect_tcp, memory};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Echoes every SEND back to the sender's own subscriptions on the same
/// destination.
#[derive(Default)]
struct EchoBroker {
    /// connection → (subscription id, destination)
    subscriptions: Mutex<HashMap<ConnectionId, Vec<(String, String)>>>,
    next_message: Mutex<u64>,
}

impl EchoBroker {
    fn matching(&self, conn: ConnectionId, destination: &str) -> Vec<String> {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions
            .get(&conn)
            .into_iter()
            .flatten()
            .filter(|(_, dest)| dest == destination)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn message_id(&self) -> String {
        let mut next = self.next_message.lock().unwrap_or_else(|e| e.into_inner());
        *next += 1;
        format!("msg-{next}")
    }
}

impl ServerHandler for EchoBroker {
    async fn on_subscribe(
        &self,
        conn: &ServerConnection,
        mut frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        frame.drain().await?;
        let id = frame.header(header::ID).ok_or(StompError::MissingHeader(header::ID))?;
        let destination = frame
            .header(header::DESTINATION)
            .ok_or(StompError::MissingHeader(header::DESTINATION))?;
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(conn.id())
            .or_default()
            .push((id.to_string(), destination.to_string()));
        responder.respond().await
    }

    async fn on_send(
        &self,
        conn: &ServerConnection,
        mut frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        let destination = frame.header(header::DESTINATION).unwrap_or_default().to_string();
        let body = frame.read_to_end().await?;
        for subscription in self.matching(conn.id(), &destination) {
            let headers = HeaderBag::new()
                .with(header::DESTINATION, destination.as_str())
                .with(header::SUBSCRIPTION, subscription)
                .with(header::MESSAGE_ID, self.message_id());
            let mut message = conn.send_frame("MESSAGE", headers).await?;
            message.end_with(body.clone()).await?;
        }
        responder.respond().await
    }

    async fn on_disconnect(
        &self,
        conn: &ServerConnection,
        mut frame: InboundFrame,
        responder: Responder,
    ) -> Result<(), StompError> {
        frame.drain().await?;
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&conn.id());
        responder.respond().await?;
        conn.close().await;
        Ok(())
    }
}

/// Connects, subscribes, sends a few messages, acks the echoes, and
/// disconnects.
async fn exercise(client: Client, label: &str) -> Result<(), StompError> {
    client.on_error(|e| tracing::warn!(error = %e, "client error"));
    client.connect("localhost").await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = client
        .subscribe(
            HeaderBag::new()
                .with(header::DESTINATION, "/queue/echo")
                .with(header::ACK, "client"),
            move |message| {
                let _ = tx.send(message);
            },
        )
        .await?;

    for n in 1..=3 {
        let mut frame = client
            .send(HeaderBag::new().with(header::DESTINATION, "/queue/echo"))
            .await?;
        frame.write(format!("{label} ")).await?;
        frame.end_with(format!("message {n}")).await?;
    }

    let mut last = None;
    for _ in 0..3 {
        let Some(mut message) = rx.recv().await else {
            break;
        };
        let body = message.read_to_end().await?;
        tracing::info!(
            subscription = subscription.id(),
            message_id = message.message_id(),
            body = %String::from_utf8_lossy(&body),
            "echo received"
        );
        last = Some(message);
    }
    // One cumulative ack covers all three.
    if let Some(message) = last {
        message.ack().await?;
    }

    subscription.unsubscribe().await?;
    client.disconnect().await
}

#[tokio::main]
async fn main() -> Result<(), StompError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let broker = Arc::new(EchoBroker::default());

    let (client_end, server_end) = memory::pair();
    let _server = ServerConnection::accept(server_end, Arc::clone(&broker));
    exercise(Client::new(client_end), "memory").await?;

    let transport = TcpTransport::bind("127.0.0.1:0").await?;
    let addr = transport.local_addr().map_err(stomper::transport::TransportError::AcceptFailed)?;
    tracing::info!(%addr, "listening");
    let server = StompServer::<TcpTransport, EchoBroker>::builder()
        .on_connection(|conn| tracing::info!(conn_id = %conn.id(), "client connected"))
        .build(transport, EchoBroker::default());
    let stop = server.shutdown_signal();
    let running = tokio::spawn(server.run());

    exercise(Client::new(connect_tcp(&addr.to_string()).await?), "tcp").await?;
    stop.trigger();
    match running.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "server task failed");
            Ok(())
        }
    }
}
