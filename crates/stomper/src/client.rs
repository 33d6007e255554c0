//! The client facade: connect, send, subscribe, acknowledge, disconnect.

use std::sync::Arc;

use bytes::Bytes;
use stomper_protocol::{Command, FrameHead, HeaderBag, header};
use stomper_session::{
    InboundFrame, OutboundFrame, SessionError, SessionHandle, SessionState,
};
use stomper_subscription::{AckKind, AckMode};
use stomper_transport::{Connection, ConnectionId};
use tokio::sync::oneshot;

use crate::dispatch::{ClientDispatch, MessageCallback, Registry};
use crate::{ClientConfig, StompError, lock};

/// A STOMP client over one transport connection.
///
/// Created in [`SessionState::Idle`]; call [`connect`](Self::connect) before
/// sending or subscribing. Listeners registered with
/// [`on_connect`](Self::on_connect) and [`on_error`](Self::on_error) should
/// be in place before the peer can send anything.
///
/// Dropping the client tears the connection down without notifying anyone.
pub struct Client {
    session: SessionHandle,
    dispatch: Arc<ClientDispatch>,
    config: ClientConfig,
}

impl Client {
    /// Starts a client on `conn` with the default configuration.
    pub fn new<C: Connection>(conn: C) -> Self {
        Self::with_config(conn, ClientConfig::default())
    }

    pub fn with_config<C: Connection>(conn: C, config: ClientConfig) -> Self {
        let dispatch = Arc::new(ClientDispatch::new());
        let session = SessionHandle::start(conn, dispatch.clone(), config.session.clone());
        Self {
            session,
            dispatch,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.session.id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying engine handle.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Called with the CONNECTED frame's head, before the pending
    /// [`connect`](Self::connect) resolves.
    pub fn on_connect(&self, callback: impl Fn(&FrameHead) + Send + Sync + 'static) {
        self.dispatch.connect_listeners.add(callback);
    }

    /// Called for every error notification: ERROR frames, unknown commands,
    /// and once when the connection is destroyed.
    pub fn on_error(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.session.on_error(callback);
    }

    /// Sends CONNECT and waits for CONNECTED.
    ///
    /// # Errors
    /// Fails if the client isn't idle, if the server answers with ERROR, or
    /// if the connection goes down first.
    pub async fn connect(&self, host: &str) -> Result<(), StompError> {
        self.session.transition(SessionState::Connecting)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.dispatch.pending).connect = Some(tx);

        let mut headers = HeaderBag::new()
            .with(header::ACCEPT_VERSION, &self.config.accept_version)
            .with(header::HOST, host);
        if let Some(login) = &self.config.login {
            headers.set(header::LOGIN, login);
        }
        if let Some(passcode) = &self.config.passcode {
            headers.set(header::PASSCODE, passcode);
        }
        self.session
            .send_frame(&FrameHead::for_command(Command::Connect, headers), b"")
            .await?;
        tracing::debug!(conn_id = %self.id(), host, "CONNECT sent");

        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Destroyed.into()),
        }
    }

    /// Opens a SEND frame. Write the body to the returned frame and end it.
    ///
    /// Frames queue: a second `send` waits until the previous frame ends.
    pub async fn send(&self, headers: HeaderBag) -> Result<OutboundFrame, StompError> {
        self.session.ensure_connected()?;
        if !headers.contains(header::DESTINATION) {
            return Err(StompError::MissingHeader(header::DESTINATION));
        }
        let head = FrameHead::for_command(Command::Send, headers);
        Ok(self.session.open_frame(&head).await?)
    }

    /// Subscribes to a destination.
    ///
    /// `headers` must carry `destination`; `ack` selects the
    /// [`AckMode`] (default `auto`); `id` is allocated when absent.
    /// `on_message` runs on the connection's reader task for every MESSAGE
    /// of this subscription, in arrival order. It should hand the message
    /// off (spawn, or push to a channel) rather than block.
    pub async fn subscribe(
        &self,
        mut headers: HeaderBag,
        on_message: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<Subscription, StompError> {
        self.session.ensure_connected()?;
        let ack_mode = AckMode::from_header(headers.get(header::ACK))?;
        let destination = headers
            .get(header::DESTINATION)
            .ok_or(StompError::MissingHeader(header::DESTINATION))?
            .to_string();

        // Register before SUBSCRIBE goes out so the first MESSAGE finds it.
        let reservation = self.session.reserve().await?;
        let callback: MessageCallback = Arc::new(on_message);
        let id = {
            let mut registry = lock(&self.dispatch.subscriptions);
            let id = match headers.get(header::ID) {
                Some(id) => id.to_string(),
                None => registry.next_id(),
            };
            registry.register(id.clone(), destination.clone(), ack_mode, callback)?;
            id
        };
        headers.set(header::ID, id.clone());

        let head = FrameHead::for_command(Command::Subscribe, headers);
        if let Err(e) = reservation.send(&head, b"").await {
            let _ = lock(&self.dispatch.subscriptions).remove(&id);
            return Err(e.into());
        }
        tracing::debug!(conn_id = %self.id(), %id, %destination, %ack_mode, "subscribed");

        Ok(Subscription {
            id,
            destination,
            ack_mode,
            session: self.session.clone(),
            registry: Arc::clone(&self.dispatch.subscriptions),
        })
    }

    /// Allocates a receipt id and starts waiting for its RECEIPT.
    ///
    /// Put the id in the `receipt` header of the frame you send, then
    /// await the waiter.
    pub fn expect_receipt(&self) -> (String, ReceiptWaiter) {
        let (tx, rx) = oneshot::channel();
        let mut pending = lock(&self.dispatch.pending);
        let id = format!("rcpt-{}", pending.next_receipt);
        pending.next_receipt += 1;
        pending.receipts.insert(id.clone(), tx);
        (id, ReceiptWaiter { rx })
    }

    /// Sends DISCONNECT and shuts the connection down cleanly.
    ///
    /// With [`ClientConfig::disconnect_receipt`] set, waits for the
    /// server's RECEIPT (or for the server to close) first. Either way the
    /// client ends in [`SessionState::Destroyed`] without an error
    /// notification.
    pub async fn disconnect(&self) -> Result<(), StompError> {
        self.session.transition(SessionState::Disconnecting)?;

        let mut headers = HeaderBag::new();
        let waiter = if self.config.disconnect_receipt {
            let (id, waiter) = self.expect_receipt();
            lock(&self.dispatch.pending).disconnect_receipt = Some(id.clone());
            headers.set(header::RECEIPT, id);
            Some(waiter)
        } else {
            None
        };

        self.session
            .send_frame(&FrameHead::for_command(Command::Disconnect, headers), b"")
            .await?;
        tracing::debug!(conn_id = %self.id(), "DISCONNECT sent");

        if let Some(waiter) = waiter {
            waiter.wait().await?;
        }
        self.session.close().await;
        Ok(())
    }

    /// Tears the connection down. See [`SessionHandle::destroy`].
    pub fn destroy(&self, error: Option<SessionError>) -> bool {
        self.session.destroy(error)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.session.release();
    }
}

/// Resolves when a RECEIPT arrives. See [`Client::expect_receipt`].
pub struct ReceiptWaiter {
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl ReceiptWaiter {
    pub async fn wait(self) -> Result<(), StompError> {
        match self.rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Destroyed.into()),
        }
    }
}

/// Handle to an active subscription.
pub struct Subscription {
    id: String,
    destination: String,
    ack_mode: AckMode,
    session: SessionHandle,
    registry: Registry,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Whether messages for this subscription are still delivered.
    pub fn is_active(&self) -> bool {
        lock(&self.registry).contains(&self.id)
    }

    /// Stops delivery and sends UNSUBSCRIBE.
    ///
    /// MESSAGE frames for this id that are already in flight are dropped.
    ///
    /// # Errors
    /// [`SubscriptionError::NotFound`](stomper_subscription::SubscriptionError::NotFound)
    /// if already unsubscribed; nothing is sent in that case.
    pub async fn unsubscribe(&self) -> Result<(), StompError> {
        let reservation = self.session.reserve().await?;
        lock(&self.registry).remove(&self.id)?;
        let head = FrameHead::for_command(
            Command::Unsubscribe,
            HeaderBag::new().with(header::ID, &self.id),
        );
        reservation.send(&head, b"").await?;
        Ok(())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("ack_mode", &self.ack_mode)
            .finish()
    }
}

/// A MESSAGE delivered to a subscription.
///
/// Headers are available right away; the body is still streaming in and is
/// read with [`chunk`](Self::chunk) or [`read_to_end`](Self::read_to_end).
pub struct Message {
    frame: InboundFrame,
    acker: Acker,
}

impl Message {
    pub(crate) fn new(frame: InboundFrame, acker: Acker) -> Self {
        Self { frame, acker }
    }

    pub fn headers(&self) -> &HeaderBag {
        self.frame.headers()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.frame.header(key)
    }

    pub fn message_id(&self) -> &str {
        &self.acker.message_id
    }

    pub fn subscription(&self) -> &str {
        &self.acker.subscription
    }

    pub fn destination(&self) -> Option<&str> {
        self.frame.header(header::DESTINATION)
    }

    /// Arrival position within the subscription, from 1.
    pub fn ordinal(&self) -> u64 {
        self.acker.ordinal
    }

    pub async fn chunk(&mut self) -> Result<Option<Bytes>, StompError> {
        Ok(self.frame.chunk().await?)
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes, StompError> {
        Ok(self.frame.read_to_end().await?)
    }

    /// Acknowledges this message. Returns whether an ACK frame was sent.
    pub async fn ack(&self) -> Result<bool, StompError> {
        self.acker.ack().await
    }

    /// Negatively acknowledges this message. Returns whether a NACK frame
    /// was sent.
    pub async fn nack(&self) -> Result<bool, StompError> {
        self.acker.nack().await
    }

    /// A detached ack/nack handle for this message.
    pub fn acker(&self) -> Acker {
        self.acker.clone()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("subscription", &self.acker.subscription)
            .field("message_id", &self.acker.message_id)
            .field("ordinal", &self.acker.ordinal)
            .finish()
    }
}

/// Ack/nack bound to one delivered message.
///
/// Whether a call puts a frame on the wire depends on the subscription's
/// [`AckMode`]: never for `auto`, always for `client-individual`, and for
/// `client` only when the message is newer than everything acknowledged so
/// far.
#[derive(Clone)]
pub struct Acker {
    pub(crate) session: SessionHandle,
    pub(crate) registry: Registry,
    pub(crate) subscription: String,
    pub(crate) ordinal: u64,
    pub(crate) message_id: String,
    /// Value for the ACK/NACK `id` header.
    pub(crate) ack_id: String,
}

impl Acker {
    pub async fn ack(&self) -> Result<bool, StompError> {
        self.acknowledge(AckKind::Ack).await
    }

    pub async fn nack(&self) -> Result<bool, StompError> {
        self.acknowledge(AckKind::Nack).await
    }

    async fn acknowledge(&self, kind: AckKind) -> Result<bool, StompError> {
        // Decide while holding the frame slot so frames leave in decision
        // order.
        let reservation = self.session.reserve().await?;
        let decision = lock(&self.registry).acknowledge(&self.subscription, self.ordinal)?;
        if !decision.should_send() {
            tracing::trace!(subscription = %self.subscription, ordinal = self.ordinal, ?kind, "ack skipped");
            return Ok(false);
        }

        let command = match kind {
            AckKind::Ack => Command::Ack,
            AckKind::Nack => Command::Nack,
        };
        let headers = HeaderBag::new()
            .with(header::ID, &self.ack_id)
            .with(header::MESSAGE_ID, &self.message_id)
            .with(header::SUBSCRIPTION, &self.subscription);
        reservation
            .send(&FrameHead::for_command(command, headers), b"")
            .await?;
        Ok(true)
    }
}
