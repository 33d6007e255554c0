//! # stomper
//!
//! STOMP client and server over any byte-stream transport.
//!
//! The crates underneath split the work by layer:
//!
//! ```text
//! stomper-transport     bytes in, bytes out (TCP, WebSocket, in-memory)
//! stomper-protocol      frame codec: FrameHead, HeaderBag, FrameDecoder
//! stomper-session       per-connection engine: state, frame slot, reader/writer tasks
//! stomper-subscription  subscription registry and ack policy
//! stomper               client and server facades (this crate)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stomper::prelude::*;
//!
//! # async fn demo() -> Result<(), StompError> {
//! let conn = stomper::transport::connect_tcp("127.0.0.1:61613").await?;
//! let client = Client::new(conn);
//! client.connect("localhost").await?;
//!
//! let mut frame = client.send(HeaderBag::new().with("destination", "/queue/a")).await?;
//! frame.end_with("hello").await?;
//!
//! client.disconnect().await
//! # }
//! ```

mod client;
mod config;
mod dispatch;
mod error;
mod handler;
mod server;

pub use client::{Acker, Client, Message, ReceiptWaiter, Subscription};
pub use config::{ClientConfig, ServerConfig};
pub use error::StompError;
pub use handler::{DefaultHandler, Responder, ServerHandler};
pub use server::{ServerConnection, ServerConnectionBuilder, StompServer, StompServerBuilder};

pub use stomper_protocol as protocol;
pub use stomper_session as session;
pub use stomper_subscription as subscription;
pub use stomper_transport as transport;

pub mod prelude {
    pub use crate::{
        Acker, Client, ClientConfig, DefaultHandler, Message, Responder, ServerConfig,
        ServerConnection, ServerHandler, StompError, StompServer, Subscription,
    };
    pub use stomper_protocol::{Command, FrameHead, HeaderBag, header};
    pub use stomper_session::{InboundFrame, OutboundFrame, SessionConfig, SessionError, SessionState};
    pub use stomper_subscription::AckMode;
    pub use stomper_transport::{Connection, ShutdownSignal, Transport};
}

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
