//! The connection engine: reader and writer tasks plus lifecycle.
//!
//! ```text
//!             ┌──────── reader task ────────┐
//!  transport ─┤ recv → FrameDecoder → Dispatch::dispatch(head) ├─→ facade
//!             │          └─ body chunks → InboundFrame         │
//!             └──────────────────────────────────────────────┘
//!
//!  facade → reserve() (FIFO frame slot) → writer queue → writer task → transport
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use stomper_protocol::{DecodeEvent, FrameDecoder, FrameHead, ProtocolError, encode_frame};
use stomper_transport::{Connection, ConnectionId};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::inbound::BodyEvent;
use crate::outbound::{FrameSlot, WriteCommand};
use crate::{
    FrameReservation, InboundFrame, Listeners, OutboundFrame, SessionConfig, SessionError,
    SessionState, lock,
};

/// Decides what arriving frames mean.
///
/// Implemented by the client and server facades. Both methods run
/// synchronously on engine tasks: spawn for anything that has to await.
pub trait Dispatch: Send + Sync + 'static {
    /// Called on the reader task once per frame, in arrival order, as soon
    /// as the head is parsed. The body keeps arriving through `frame`.
    fn dispatch(&self, session: &SessionHandle, frame: InboundFrame);

    /// Called exactly once when the connection reaches
    /// [`SessionState::Destroyed`]. `error` is `None` for a clean
    /// disconnect. Runs before the error listeners.
    fn terminated(&self, session: &SessionHandle, error: Option<&SessionError>) {
        let _ = (session, error);
    }
}

type Closer = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Tasks {
    reader: AbortHandle,
    writer: AbortHandle,
}

struct Shared {
    id: ConnectionId,
    config: SessionConfig,
    state: Mutex<SessionState>,
    slot: Arc<AsyncMutex<FrameSlot>>,
    dispatch: Arc<dyn Dispatch>,
    errors: Listeners<SessionError>,
    tasks: Mutex<Option<Tasks>>,
    /// Force-closes the transport. Type-erased so the handle isn't generic
    /// over the connection type. Taken on destroy so the connection is
    /// dropped once the tasks are gone, even if it was already closed.
    closer: Mutex<Option<Closer>>,
    transport_closed: AtomicBool,
}

/// Handle to a running connection. Cheap to clone.
///
/// Dropping every handle does not stop the connection; it runs until the
/// peer goes away or someone calls [`destroy`](Self::destroy),
/// [`close`](Self::close) or [`release`](Self::release).
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Takes ownership of `conn` and starts its reader and writer tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<C: Connection>(
        conn: C,
        dispatch: Arc<dyn Dispatch>,
        config: SessionConfig,
    ) -> Self {
        let id = conn.id();
        let conn = Arc::new(conn);
        let (tx, rx) = mpsc::channel(config.write_queue.max(1));

        let closer_conn = Arc::clone(&conn);
        let closer: Closer = Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                if let Err(e) = closer_conn.close().await {
                    tracing::debug!(conn_id = %closer_conn.id(), error = %e, "transport close failed");
                }
            })
        });

        let handle = Self {
            shared: Arc::new(Shared {
                id,
                config,
                state: Mutex::new(SessionState::Idle),
                slot: Arc::new(AsyncMutex::new(FrameSlot::new(tx))),
                dispatch,
                errors: Listeners::new(),
                tasks: Mutex::new(None),
                closer: Mutex::new(Some(closer)),
                transport_closed: AtomicBool::new(false),
            }),
        };

        let writer = tokio::spawn(write_loop(Arc::clone(&conn), rx, handle.clone()));
        let reader = tokio::spawn(read_loop(conn, handle.clone()));
        *lock(&handle.shared.tasks) = Some(Tasks {
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
        });
        // A multi-threaded runtime may have already torn us down.
        if handle.is_destroyed() {
            if let Some(tasks) = lock(&handle.shared.tasks).take() {
                tasks.reader.abort();
                tasks.writer.abort();
            }
        }

        tracing::debug!(conn_id = %id, "session started");
        handle
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.shared.state)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().is_destroyed()
    }

    /// Moves to `to`, returning the previous state.
    ///
    /// Destruction goes through [`destroy`](Self::destroy) instead, so
    /// `Destroyed` is not accepted here.
    pub fn transition(&self, to: SessionState) -> Result<SessionState, SessionError> {
        let mut state = lock(&self.shared.state);
        let from = *state;
        if to.is_destroyed() || !from.can_transition_to(to) {
            return Err(if from.is_destroyed() {
                SessionError::Destroyed
            } else {
                SessionError::InvalidTransition { from, to }
            });
        }
        *state = to;
        drop(state);
        tracing::debug!(conn_id = %self.id(), ?from, ?to, "state transition");
        Ok(from)
    }

    /// Fails with [`SessionError::NotConnected`] unless connected.
    pub fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Connected => Ok(()),
            SessionState::Destroyed => Err(SessionError::Destroyed),
            other => Err(SessionError::NotConnected(other)),
        }
    }

    /// Registers an error listener.
    pub fn on_error(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.shared.errors.add(callback);
    }

    /// Raises a non-fatal error notification.
    pub fn notify_error(&self, error: &SessionError) {
        tracing::debug!(conn_id = %self.id(), %error, "error notification");
        self.shared.errors.emit(error);
    }

    /// Waits for the frame slot (FIFO behind any open frame).
    pub async fn reserve(&self) -> Result<FrameReservation, SessionError> {
        if self.is_destroyed() {
            return Err(SessionError::Destroyed);
        }
        let guard = Arc::clone(&self.shared.slot).lock_owned().await;
        if self.is_destroyed() {
            return Err(SessionError::Destroyed);
        }
        Ok(FrameReservation::new(guard))
    }

    /// Writes a complete frame.
    pub async fn send_frame(&self, head: &FrameHead, body: &[u8]) -> Result<(), SessionError> {
        // Encode first so a bad head fails before we queue behind anyone.
        let bytes = encode_frame(head, body)?;
        self.reserve().await?.send_encoded(bytes).await
    }

    /// Writes a frame head and returns the frame for streaming its body.
    pub async fn open_frame(&self, head: &FrameHead) -> Result<OutboundFrame, SessionError> {
        self.reserve().await?.open(head).await
    }

    /// Tears the connection down.
    ///
    /// Idempotent: returns `false` if it was already destroyed. Otherwise
    /// stops both tasks, force-closes the transport, runs
    /// [`Dispatch::terminated`] and emits one error notification with
    /// `error`, or [`SessionError::Unknown`] when none was given. Safe to
    /// call from inside callbacks.
    pub fn destroy(&self, error: Option<SessionError>) -> bool {
        self.terminate(Some(error.unwrap_or(SessionError::Unknown)))
    }

    /// Clean shutdown: waits for queued frames to flush, closes the
    /// transport, and ends the session without an error notification.
    pub async fn close(&self) {
        if self.is_destroyed() {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        let queued = match self.reserve().await {
            Ok(reservation) => reservation.close(done_tx).await,
            Err(e) => Err(e),
        };
        if queued.is_ok() {
            let _ = done_rx.await;
        }
        self.terminate(None);
    }

    /// Ends the session quietly: listeners are dropped first, so nothing
    /// is notified. Used when the owner goes away.
    pub fn release(&self) {
        self.shared.errors.clear();
        self.terminate(None);
    }

    /// Reacts to the peer closing the stream.
    ///
    /// End of stream is expected while disconnecting, or after we closed
    /// our own side; anywhere else the peer went away on us.
    fn transport_ended(&self, finish: Result<(), ProtocolError>) {
        let expected = self.state() == SessionState::Disconnecting
            || self.shared.transport_closed.load(Ordering::SeqCst);
        if let Err(e) = finish {
            self.destroy(Some(e.into()));
        } else if expected {
            self.terminate(None);
        } else {
            self.destroy(Some(SessionError::ConnectionClosed));
        }
    }

    fn terminate(&self, error: Option<SessionError>) -> bool {
        {
            let mut state = lock(&self.shared.state);
            if state.is_destroyed() {
                return false;
            }
            tracing::debug!(conn_id = %self.id(), from = ?*state, error = ?error, "session destroyed");
            *state = SessionState::Destroyed;
        }

        if let Some(tasks) = lock(&self.shared.tasks).take() {
            tasks.reader.abort();
            tasks.writer.abort();
        }
        let closer = lock(&self.shared.closer).take();
        if !self.shared.transport_closed.swap(true, Ordering::SeqCst) {
            if let Some(close) = closer {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(close());
                    }
                    Err(_) => tracing::warn!(conn_id = %self.id(), "no runtime to close transport"),
                }
            }
        }

        self.shared.dispatch.terminated(self, error.as_ref());
        if let Some(error) = &error {
            self.shared.errors.emit(error);
        }
        true
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop<C: Connection>(conn: Arc<C>, session: SessionHandle) {
    let config = session.config().clone();
    let mut decoder = FrameDecoder::with_max_line_length(config.max_line_length);
    // Feeds the body of the frame currently being decoded. `None` between
    // frames, or when the consumer dropped the frame and the rest is skipped.
    let mut body: Option<mpsc::Sender<BodyEvent>> = None;

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(conn_id = %session.id(), "transport closed by peer");
                session.transport_ended(decoder.finish());
                return;
            }
            Err(e) => {
                session.destroy(Some(e.into()));
                return;
            }
        };

        let events = match decoder.feed(&data) {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(conn_id = %session.id(), error = %e, "decode failed");
                session.destroy(Some(e.into()));
                return;
            }
        };

        for event in events {
            if session.is_destroyed() {
                return;
            }
            match event {
                DecodeEvent::Head(head) => {
                    tracing::trace!(conn_id = %session.id(), command = %head.command, "frame received");
                    let (tx, frame) = InboundFrame::channel(head, config.body_buffer);
                    body = Some(tx);
                    session.shared.dispatch.dispatch(&session, frame);
                }
                DecodeEvent::Body(chunk) => {
                    let consumer_gone = match &body {
                        Some(tx) => tx.send(BodyEvent::Chunk(chunk)).await.is_err(),
                        None => false,
                    };
                    if consumer_gone {
                        body = None;
                    }
                }
                DecodeEvent::End => {
                    if let Some(tx) = body.take() {
                        let _ = tx.send(BodyEvent::End).await;
                    }
                }
            }
        }
    }
}

async fn write_loop<C: Connection>(
    conn: Arc<C>,
    mut rx: mpsc::Receiver<WriteCommand>,
    session: SessionHandle,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Write(bytes) => {
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(conn_id = %session.id(), error = %e, "transport write failed");
                    session.destroy(Some(e.into()));
                    return;
                }
            }
            WriteCommand::Close(done) => {
                session.shared.transport_closed.store(true, Ordering::SeqCst);
                if let Err(e) = conn.close().await {
                    tracing::debug!(conn_id = %session.id(), error = %e, "transport close failed");
                }
                let _ = done.send(());
                return;
            }
        }
    }
}
