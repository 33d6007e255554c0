//! Server side: per-connection dispatch, [`ServerConnection`], and the
//! [`StompServer`] accept loop.
//!
//! ```text
//! reader task ── ServerDispatch::dispatch ──→ job queue ──→ handler task ── ServerHandler::on_*
//!                     │                                        └─ Responder::respond → frame slot
//!                     └─ CONNECT: state → Connected, `connection` listeners
//! ```

use std::sync::{Arc, Mutex};

use rand::Rng;
use stomper_protocol::{Command, FrameHead, HeaderBag, header};
use stomper_session::{
    Dispatch, InboundFrame, Listeners, OutboundFrame, SessionError, SessionHandle, SessionState,
};
use stomper_transport::{Connection, ConnectionId, ShutdownSignal, Transport, TransportError};
use tokio::sync::mpsc;

use crate::{Responder, ServerConfig, ServerHandler, StompError, lock};

type ConnectionCallback = Arc<dyn Fn(&ServerConnection) + Send + Sync>;

/// One client frame waiting for its handler.
struct Job {
    command: Command,
    frame: InboundFrame,
    responder: Responder,
}

struct ServerDispatch {
    config: ServerConfig,
    connection_listeners: Arc<Listeners<ServerConnection>>,
    /// Dropped on teardown, which lets the handler task finish.
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl ServerDispatch {
    fn connection(&self, session: &SessionHandle) -> ServerConnection {
        ServerConnection {
            session: session.clone(),
            connection_listeners: Arc::clone(&self.connection_listeners),
        }
    }

    /// The frame a handler's [`Responder`] will send.
    fn response_for(&self, command: Command, head: &FrameHead) -> Option<FrameHead> {
        match command {
            Command::Connect | Command::Stomp => Some(FrameHead::for_command(
                Command::Connected,
                HeaderBag::new()
                    .with(header::VERSION, &self.config.version)
                    .with(header::SESSION, generate_session_id())
                    .with(header::SERVER, &self.config.server_name),
            )),
            _ => head.header(header::RECEIPT).map(|receipt| {
                FrameHead::for_command(
                    Command::Receipt,
                    HeaderBag::new().with(header::RECEIPT_ID, receipt),
                )
            }),
        }
    }

    /// Refuses a frame: error notification, then an ERROR frame.
    fn reject(&self, session: &SessionHandle, error: SessionError, close: bool) {
        tracing::debug!(conn_id = %session.id(), %error, close, "frame rejected");
        session.notify_error(&error);
        let session = session.clone();
        tokio::spawn(async move {
            let head = FrameHead::for_command(
                Command::Error,
                HeaderBag::new().with(header::MESSAGE, error.to_string()),
            );
            if let Err(e) = session.send_frame(&head, b"").await {
                tracing::debug!(conn_id = %session.id(), error = %e, "ERROR frame not sent");
            }
            if close {
                session.close().await;
            }
        });
    }
}

impl Dispatch for ServerDispatch {
    fn dispatch(&self, session: &SessionHandle, frame: InboundFrame) {
        let command = match frame.known_command() {
            Some(command) if command.is_client_command() => command,
            _ => {
                let error = SessionError::UnknownCommand(frame.command().to_string());
                self.reject(session, error, false);
                return;
            }
        };

        match (session.state(), command) {
            (SessionState::Idle, Command::Connect | Command::Stomp) => {
                if session.transition(SessionState::Connected).is_err() {
                    return;
                }
                tracing::info!(conn_id = %session.id(), "client connected");
                self.connection_listeners.emit(&self.connection(session));
            }
            (state @ SessionState::Connected, Command::Connect | Command::Stomp)
            | (state @ SessionState::Idle, _) => {
                let error = SessionError::UnexpectedFrame {
                    command: command.to_string(),
                    state,
                };
                self.reject(session, error, true);
                return;
            }
            (SessionState::Connected, Command::Disconnect) => {
                let _ = session.transition(SessionState::Disconnecting);
            }
            (SessionState::Connected, _) => {}
            (state, _) => {
                tracing::trace!(conn_id = %session.id(), %command, ?state, "frame ignored");
                return;
            }
        }

        let responder = Responder::new(session.clone(), self.response_for(command, frame.head()));
        let job = Job {
            command,
            frame,
            responder,
        };
        if let Some(jobs) = lock(&self.jobs).as_ref() {
            let _ = jobs.send(job);
        }
    }

    fn terminated(&self, session: &SessionHandle, error: Option<&SessionError>) {
        lock(&self.jobs).take();
        match error {
            Some(error) => tracing::debug!(conn_id = %session.id(), %error, "server connection destroyed"),
            None => tracing::debug!(conn_id = %session.id(), "server connection closed"),
        }
    }
}

/// Runs a connection's handlers, one frame at a time.
async fn run_handlers<H: ServerHandler>(
    handler: Arc<H>,
    conn: ServerConnection,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(Job {
        command,
        frame,
        responder,
    }) = jobs.recv().await
    {
        let result = match command {
            Command::Connect | Command::Stomp => handler.on_connect(&conn, frame, responder).await,
            Command::Send => handler.on_send(&conn, frame, responder).await,
            Command::Subscribe => handler.on_subscribe(&conn, frame, responder).await,
            Command::Unsubscribe => handler.on_unsubscribe(&conn, frame, responder).await,
            Command::Ack => handler.on_ack(&conn, frame, responder).await,
            Command::Nack => handler.on_nack(&conn, frame, responder).await,
            Command::Disconnect => handler.on_disconnect(&conn, frame, responder).await,
            other => {
                tracing::debug!(conn_id = %conn.id(), command = %other, "no handler for command");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(conn_id = %conn.id(), %command, error = %e, "handler failed");
        }
    }
}

/// Generates a random 32-character hex string for the CONNECTED `session`
/// header.
fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The server's end of one client connection.
///
/// Cheap to clone; every clone refers to the same connection. Handlers
/// receive one to push frames (MESSAGE, ERROR, ...) to the client.
#[derive(Clone)]
pub struct ServerConnection {
    session: SessionHandle,
    connection_listeners: Arc<Listeners<ServerConnection>>,
}

impl ServerConnection {
    /// Starts serving `conn` with the default configuration.
    pub fn accept<C: Connection, H: ServerHandler>(conn: C, handler: Arc<H>) -> Self {
        Self::builder().accept(conn, handler)
    }

    pub fn builder() -> ServerConnectionBuilder {
        ServerConnectionBuilder::new()
    }

    pub fn id(&self) -> ConnectionId {
        self.session.id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Called when the client's CONNECT arrives, before its handler runs.
    pub fn on_connection(&self, callback: impl Fn(&ServerConnection) + Send + Sync + 'static) {
        self.connection_listeners.add(callback);
    }

    pub fn on_error(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.session.on_error(callback);
    }

    /// Opens a frame to the client. Any command is accepted; write the body
    /// and end the frame.
    pub async fn send_frame(
        &self,
        command: &str,
        headers: HeaderBag,
    ) -> Result<OutboundFrame, StompError> {
        Ok(self.session.open_frame(&FrameHead::new(command, headers)).await?)
    }

    /// Flushes pending frames and closes the connection cleanly.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Tears the connection down. See [`SessionHandle::destroy`].
    pub fn destroy(&self, error: Option<SessionError>) -> bool {
        self.session.destroy(error)
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Configures a [`ServerConnection`] before it starts reading, so no
/// early frame can miss a listener.
pub struct ServerConnectionBuilder {
    config: ServerConfig,
    listeners: Listeners<ServerConnection>,
}

impl ServerConnectionBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            listeners: Listeners::new(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_connection(
        self,
        callback: impl Fn(&ServerConnection) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.add(callback);
        self
    }

    /// Starts the connection's engine and handler task.
    pub fn accept<C: Connection, H: ServerHandler>(self, conn: C, handler: Arc<H>) -> ServerConnection {
        let connection_listeners = Arc::new(self.listeners);
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatch = Arc::new(ServerDispatch {
            config: self.config.clone(),
            connection_listeners: Arc::clone(&connection_listeners),
            jobs: Mutex::new(Some(tx)),
        });
        let session = SessionHandle::start(conn, dispatch, self.config.session);
        let connection = ServerConnection {
            session,
            connection_listeners,
        };
        tokio::spawn(run_handlers(handler, connection.clone(), rx));
        tracing::debug!(conn_id = %connection.id(), "serving connection");
        connection
    }
}

impl Default for ServerConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`StompServer`].
///
/// # Example
///
/// ```rust,ignore
/// let transport = TcpTransport::bind("0.0.0.0:61613").await?;
/// let server = StompServer::builder()
///     .server_name("broker/1.0")
///     .on_connection(|conn| tracing::info!(conn_id = %conn.id(), "hello"))
///     .build(transport, MyHandler::default());
/// server.run().await
/// ```
pub struct StompServerBuilder {
    config: ServerConfig,
    on_connection: Vec<ConnectionCallback>,
}

impl StompServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            on_connection: Vec::new(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the CONNECTED `server` header.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Registered on every accepted connection.
    pub fn on_connection(
        mut self,
        callback: impl Fn(&ServerConnection) + Send + Sync + 'static,
    ) -> Self {
        self.on_connection.push(Arc::new(callback));
        self
    }

    pub fn build<T: Transport, H: ServerHandler>(self, transport: T, handler: H) -> StompServer<T, H> {
        StompServer {
            transport,
            handler: Arc::new(handler),
            config: self.config,
            on_connection: self.on_connection,
            shutdown: ShutdownSignal::new(),
        }
    }
}

impl Default for StompServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts connections from a [`Transport`] and serves each with the same
/// handler.
pub struct StompServer<T: Transport, H: ServerHandler> {
    transport: T,
    handler: Arc<H>,
    config: ServerConfig,
    on_connection: Vec<ConnectionCallback>,
    shutdown: ShutdownSignal,
}

impl<T: Transport, H: ServerHandler> StompServer<T, H> {
    pub fn builder() -> StompServerBuilder {
        StompServerBuilder::new()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A handle that stops [`run`](Self::run) once triggered. Connections
    /// already accepted keep running.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Accepts and starts serving the next connection.
    pub async fn accept(&mut self) -> Result<ServerConnection, StompError> {
        let conn = self.transport.accept().await?;
        let mut builder = ServerConnection::builder().config(self.config.clone());
        for callback in &self.on_connection {
            let callback = Arc::clone(callback);
            builder = builder.on_connection(move |conn| callback(conn));
        }
        Ok(builder.accept(conn, Arc::clone(&self.handler)))
    }

    /// Runs the accept loop until the shutdown signal fires or the
    /// transport shuts down.
    pub async fn run(mut self) -> Result<(), StompError> {
        tracing::info!("stomper server running");
        let shutdown = self.shutdown.clone();

        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.triggered() => None,
                accepted = self.accept() => Some(accepted),
            };
            let Some(accepted) = accepted else {
                self.transport.shutdown().await?;
                tracing::info!("shutdown requested, stopping server");
                return Ok(());
            };
            match accepted {
                Ok(conn) => tracing::debug!(conn_id = %conn.id(), "accepted connection"),
                Err(StompError::Transport(TransportError::Shutdown)) => {
                    tracing::info!("transport shut down, stopping server");
                    return Ok(());
                }
                Err(e) => tracing::error!(error = %e, "accept failed"),
            }
        }
    }
}
