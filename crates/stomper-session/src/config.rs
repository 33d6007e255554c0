//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use stomper_protocol::DEFAULT_MAX_LINE_LENGTH;

/// Configuration for a single connection's engine.
///
/// Every field has a sensible default, so callers usually write
/// `SessionConfig { write_queue: 8, ..Default::default() }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Encoded chunks that may wait for the writer task before
    /// [`OutboundFrame::write`](crate::OutboundFrame::write) starts waiting.
    pub write_queue: usize,

    /// Body chunks buffered per inbound frame before the reader waits for
    /// the consumer.
    pub body_buffer: usize,

    /// Longest command or header line the decoder accepts.
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_queue: 64,
            body_buffer: 16,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"write_queue": 4}"#).unwrap();
        assert_eq!(config.write_queue, 4);
        assert_eq!(config.body_buffer, 16);
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE_LENGTH);
    }
}
