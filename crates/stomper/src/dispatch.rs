//! Client-side routing of arriving frames.
//!
//! The server-side counterpart lives next to the server facade in
//! `server.rs`, because it feeds that module's handler task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stomper_protocol::{Command, FrameHead, header};
use stomper_session::{Dispatch, InboundFrame, Listeners, SessionError, SessionHandle, SessionState};
use stomper_subscription::SubscriptionRegistry;
use tokio::sync::oneshot;

use crate::client::{Acker, Message};
use crate::lock;

/// Callback a subscription feeds.
pub(crate) type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
pub(crate) type Registry = Arc<Mutex<SubscriptionRegistry<MessageCallback>>>;
pub(crate) type Waiter = oneshot::Sender<Result<(), SessionError>>;

/// Operations waiting for a frame from the server.
#[derive(Default)]
pub(crate) struct Pending {
    pub(crate) connect: Option<Waiter>,
    pub(crate) receipts: HashMap<String, Waiter>,
    /// Receipt id of the DISCONNECT in flight, if any.
    pub(crate) disconnect_receipt: Option<String>,
    pub(crate) next_receipt: u64,
}

pub(crate) struct ClientDispatch {
    pub(crate) subscriptions: Registry,
    pub(crate) pending: Mutex<Pending>,
    pub(crate) connect_listeners: Listeners<FrameHead>,
}

impl ClientDispatch {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            pending: Mutex::new(Pending::default()),
            connect_listeners: Listeners::new(),
        }
    }

    fn on_connected(&self, session: &SessionHandle, frame: InboundFrame) {
        if session.transition(SessionState::Connected).is_err() {
            session.notify_error(&SessionError::UnexpectedFrame {
                command: frame.command().to_string(),
                state: session.state(),
            });
            return;
        }
        tracing::info!(
            conn_id = %session.id(),
            version = frame.header(header::VERSION).unwrap_or("?"),
            "connected"
        );
        self.connect_listeners.emit(frame.head());
        let waiter = lock(&self.pending).connect.take();
        if let Some(tx) = waiter {
            let _ = tx.send(Ok(()));
        }
    }

    fn on_message(&self, session: &SessionHandle, frame: InboundFrame) {
        let Some(subscription) = frame.header(header::SUBSCRIPTION).map(str::to_string) else {
            tracing::debug!(conn_id = %session.id(), "MESSAGE without subscription header dropped");
            return;
        };
        let delivery = lock(&self.subscriptions).deliver(&subscription);
        let Some(delivery) = delivery else {
            tracing::trace!(conn_id = %session.id(), %subscription, "MESSAGE for inactive subscription dropped");
            return;
        };

        let message_id = frame.header(header::MESSAGE_ID).unwrap_or_default().to_string();
        let ack_id = frame
            .header(header::ACK)
            .map_or_else(|| message_id.clone(), str::to_string);
        let acker = Acker {
            session: session.clone(),
            registry: Arc::clone(&self.subscriptions),
            subscription,
            ordinal: delivery.ordinal,
            message_id,
            ack_id,
        };
        (delivery.handler)(Message::new(frame, acker));
    }

    fn on_receipt(&self, session: &SessionHandle, frame: InboundFrame) {
        let Some(id) = frame.header(header::RECEIPT_ID) else {
            tracing::debug!(conn_id = %session.id(), "RECEIPT without receipt-id dropped");
            return;
        };
        let waiter = lock(&self.pending).receipts.remove(id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(()));
            }
            None => tracing::trace!(conn_id = %session.id(), receipt = id, "unawaited receipt"),
        }
    }

    fn on_error_frame(&self, session: &SessionHandle, frame: InboundFrame) {
        let error = SessionError::Remote {
            message: frame.header(header::MESSAGE).unwrap_or("remote error").to_string(),
            headers: frame.headers().clone(),
        };
        tracing::debug!(conn_id = %session.id(), %error, "ERROR frame received");
        let waiter = lock(&self.pending).connect.take();
        session.notify_error(&error);
        if let Some(tx) = waiter {
            let _ = tx.send(Err(error));
        }
    }
}

impl Dispatch for ClientDispatch {
    fn dispatch(&self, session: &SessionHandle, frame: InboundFrame) {
        match frame.known_command() {
            Some(Command::Connected) => self.on_connected(session, frame),
            Some(Command::Message) => self.on_message(session, frame),
            Some(Command::Receipt) => self.on_receipt(session, frame),
            Some(Command::Error) => self.on_error_frame(session, frame),
            _ => {
                tracing::debug!(conn_id = %session.id(), command = frame.command(), "unknown command");
                session.notify_error(&SessionError::UnknownCommand(frame.command().to_string()));
            }
        }
    }

    fn terminated(&self, session: &SessionHandle, error: Option<&SessionError>) {
        let dropped = lock(&self.subscriptions).clear();
        let pending = std::mem::take(&mut *lock(&self.pending));
        tracing::debug!(conn_id = %session.id(), subscriptions = dropped, "client torn down");

        let failure = error.cloned().unwrap_or(SessionError::ConnectionClosed);
        if let Some(tx) = pending.connect {
            let _ = tx.send(Err(failure.clone()));
        }
        for (id, tx) in pending.receipts {
            let clean_disconnect =
                error.is_none() && pending.disconnect_receipt.as_deref() == Some(id.as_str());
            let _ = tx.send(if clean_disconnect {
                Ok(())
            } else {
                Err(failure.clone())
            });
        }
    }
}
