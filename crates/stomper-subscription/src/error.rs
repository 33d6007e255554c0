//! Error types for the subscription layer.

/// Errors that can occur while managing subscriptions and acks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// No subscription is registered under this id. It was never created,
    /// or it has been unsubscribed or torn down with its connection.
    #[error("subscription {0} not found")]
    NotFound(String),

    /// A subscription with this id is already registered.
    #[error("subscription {0} already exists")]
    DuplicateId(String),

    /// The `ack` header named a mode we don't know.
    #[error("invalid ack mode: {0:?}")]
    InvalidAckMode(String),

    /// The ordinal was never handed out for this subscription.
    #[error("message ordinal {ordinal} was never delivered on subscription {id}")]
    UnknownOrdinal { id: String, ordinal: u64 },
}
