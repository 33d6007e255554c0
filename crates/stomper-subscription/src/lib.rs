//! Subscription tracking and acknowledgement policy for stomper.
//!
//! Pure bookkeeping, no I/O: which subscriptions exist on a connection,
//! which callback each one feeds, the arrival order of its messages, and
//! whether a given ack/nack call has to put a frame on the wire.
//!
//! # Key types
//!
//! - [`SubscriptionRegistry`] — id → (ack mode, handler, ack progress)
//! - [`AckMode`] — `auto`, `client` (cumulative), `client-individual`
//! - [`AckDecision`] — send a frame, or skip it

mod ack;
mod error;
mod registry;

pub use ack::{AckDecision, AckKind, AckMode};
pub use error::SubscriptionError;
pub use registry::{Delivery, SubscriptionRegistry};
