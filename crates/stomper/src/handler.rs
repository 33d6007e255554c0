//! Server-side frame handling: the [`ServerHandler`] trait and the
//! single-use [`Responder`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use stomper_protocol::FrameHead;
use stomper_session::{InboundFrame, SessionHandle};

use crate::{ServerConnection, StompError};

/// What a server does with client frames.
///
/// One method per client command. Each gets the connection, the frame
/// (body still streaming) and a [`Responder`] that sends the protocol
/// response: CONNECTED for CONNECT, RECEIPT when the frame asked for one,
/// nothing otherwise.
///
/// Handlers for one connection run one at a time, in arrival order, on a
/// task of their own; a handler can await its frame's body without stalling
/// the connection's reader.
///
/// Every method has a default that drains the body and responds. The
/// default [`on_disconnect`](Self::on_disconnect) also closes the
/// connection once the receipt is out.
///
/// Implement methods with `async fn`:
///
/// ```rust,ignore
/// impl ServerHandler for Echo {
///     async fn on_send(
///         &self,
///         conn: &ServerConnection,
///         mut frame: InboundFrame,
///         responder: Responder,
///     ) -> Result<(), StompError> {
///         let body = frame.read_to_end().await?;
///         tracing::info!(len = body.len(), "got SEND");
///         responder.respond().await
///     }
/// }
/// ```
pub trait ServerHandler: Send + Sync + 'static {
    /// CONNECT or STOMP. The `connection` listeners have already run.
    fn on_connect(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        drain_and_respond(frame, responder)
    }

    fn on_send(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        drain_and_respond(frame, responder)
    }

    fn on_subscribe(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        drain_and_respond(frame, responder)
    }

    fn on_unsubscribe(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        drain_and_respond(frame, responder)
    }

    fn on_ack(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        drain_and_respond(frame, responder)
    }

    fn on_nack(
        &self,
        _conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        drain_and_respond(frame, responder)
    }

    fn on_disconnect(
        &self,
        conn: &ServerConnection,
        frame: InboundFrame,
        responder: Responder,
    ) -> impl Future<Output = Result<(), StompError>> + Send {
        async move {
            drain_and_respond(frame, responder).await?;
            conn.close().await;
            Ok(())
        }
    }
}

/// A handler that accepts everything and does nothing beyond the protocol
/// responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl ServerHandler for DefaultHandler {}

async fn drain_and_respond(mut frame: InboundFrame, responder: Responder) -> Result<(), StompError> {
    frame.drain().await?;
    responder.respond().await
}

/// Sends the response to one client frame. Single use.
pub struct Responder {
    session: SessionHandle,
    response: Option<FrameHead>,
    used: AtomicBool,
}

impl Responder {
    pub(crate) fn new(session: SessionHandle, response: Option<FrameHead>) -> Self {
        Self {
            session,
            response,
            used: AtomicBool::new(false),
        }
    }

    /// The frame [`respond`](Self::respond) will send, if any.
    pub fn response(&self) -> Option<&FrameHead> {
        self.response.as_ref()
    }

    /// Lets the handler add headers to the response before sending it.
    pub fn response_mut(&mut self) -> Option<&mut FrameHead> {
        self.response.as_mut()
    }

    pub fn has_responded(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    /// Sends the response (a no-op on the wire when there is none).
    ///
    /// # Errors
    /// [`StompError::AlreadyResponded`] on the second call.
    pub async fn respond(&self) -> Result<(), StompError> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(StompError::AlreadyResponded);
        }
        if let Some(head) = &self.response {
            self.session.send_frame(head, b"").await?;
            tracing::trace!(conn_id = %self.session.id(), command = %head.command, "responded");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("response", &self.response)
            .field("used", &self.has_responded())
            .finish()
    }
}
