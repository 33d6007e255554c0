//! Acknowledgement modes and the per-call decision they produce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SubscriptionError;

/// How a subscription's messages are acknowledged.
///
/// Parsed from the `ack` header of SUBSCRIBE; a missing header means
/// [`AckMode::Auto`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Delivery is acknowledgement. ack/nack send nothing.
    #[default]
    Auto,
    /// Cumulative: acking message N covers every earlier message.
    Client,
    /// Every message is acknowledged on its own.
    ClientIndividual,
}

impl AckMode {
    /// The value used in the `ack` header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::ClientIndividual => "client-individual",
        }
    }

    /// Reads the mode from an optional `ack` header value.
    pub fn from_header(value: Option<&str>) -> Result<Self, SubscriptionError> {
        value.map_or(Ok(Self::Auto), |v| v.parse())
    }
}

impl FromStr for AckMode {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "client" => Ok(Self::Client),
            "client-individual" => Ok(Self::ClientIndividual),
            other => Err(SubscriptionError::InvalidAckMode(other.to_string())),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which acknowledgement frame a call would produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nack,
}

/// Outcome of an ack/nack request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Put an ACK/NACK frame for this message on the wire.
    Send,
    /// Nothing to send: the mode is `auto`, or a cumulative ack already
    /// covers this message.
    Skip,
}

impl AckDecision {
    pub fn should_send(self) -> bool {
        matches!(self, Self::Send)
    }
}

/// Cumulative/individual policy for one ack call.
///
/// `highest` is the largest ordinal already acknowledged in `client` mode
/// and is advanced when the call sends.
pub(crate) fn decide(mode: AckMode, highest: &mut Option<u64>, ordinal: u64) -> AckDecision {
    match mode {
        AckMode::Auto => AckDecision::Skip,
        AckMode::ClientIndividual => AckDecision::Send,
        AckMode::Client => match *highest {
            Some(h) if ordinal <= h => AckDecision::Skip,
            _ => {
                *highest = Some(ordinal);
                AckDecision::Send
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header_missing_is_auto() {
        assert_eq!(AckMode::from_header(None), Ok(AckMode::Auto));
        assert_eq!(
            AckMode::from_header(Some("client-individual")),
            Ok(AckMode::ClientIndividual)
        );
    }

    #[test]
    fn test_from_header_unknown_is_error() {
        assert_eq!(
            AckMode::from_header(Some("sometimes")),
            Err(SubscriptionError::InvalidAckMode("sometimes".into()))
        );
    }

    #[test]
    fn test_ack_mode_serde_uses_header_spelling() {
        let json = serde_json::to_string(&AckMode::ClientIndividual).unwrap();
        assert_eq!(json, "\"client-individual\"");
        let mode: AckMode = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(mode, AckMode::Client);
    }

    #[test]
    fn test_decide_auto_never_sends() {
        let mut highest = None;
        assert_eq!(decide(AckMode::Auto, &mut highest, 1), AckDecision::Skip);
        assert_eq!(highest, None);
    }

    #[test]
    fn test_decide_individual_always_sends() {
        let mut highest = None;
        for ordinal in [2, 1, 2] {
            assert_eq!(
                decide(AckMode::ClientIndividual, &mut highest, ordinal),
                AckDecision::Send
            );
        }
        assert_eq!(highest, None);
    }

    #[test]
    fn test_decide_client_out_of_order_sends_once() {
        let mut highest = None;
        assert_eq!(decide(AckMode::Client, &mut highest, 2), AckDecision::Send);
        assert_eq!(decide(AckMode::Client, &mut highest, 1), AckDecision::Skip);
        assert_eq!(decide(AckMode::Client, &mut highest, 2), AckDecision::Skip);
        assert_eq!(decide(AckMode::Client, &mut highest, 3), AckDecision::Send);
        assert_eq!(highest, Some(3));
    }
}
