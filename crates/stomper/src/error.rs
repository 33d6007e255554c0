//! Unified error type for the stomper facade.

use stomper_protocol::ProtocolError;
use stomper_session::SessionError;
use stomper_subscription::SubscriptionError;
use stomper_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift errors from any layer.
#[derive(Debug, thiserror::Error)]
pub enum StompError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connection lifecycle and frame I/O errors, including errors reported
    /// by the peer.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Unknown subscription, duplicate id, bad ack mode.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// A [`Responder`](crate::Responder) was invoked twice.
    #[error("response already sent")]
    AlreadyResponded,

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: StompError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, StompError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: StompError = ProtocolError::Truncated.into();
        assert!(matches!(err, StompError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error_keeps_message() {
        let err: StompError = SessionError::Unknown.into();
        assert_eq!(err.to_string(), "unknown error");
    }

    #[test]
    fn test_from_subscription_error() {
        let err: StompError = SubscriptionError::NotFound("sub-1".into()).into();
        assert!(matches!(err, StompError::Subscription(SubscriptionError::NotFound(_))));
    }
}
