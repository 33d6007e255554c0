//! The frame head: everything before the body.

use crate::{Command, HeaderBag};

/// Command line plus header block of a frame.
///
/// The body is deliberately not part of this type. Outbound bodies are
/// written after the head has gone out, and inbound bodies are streamed
/// after the head has been dispatched, so the head is always complete
/// before the first body byte moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHead {
    pub command: String,
    pub headers: HeaderBag,
}

impl FrameHead {
    pub fn new(command: impl Into<String>, headers: HeaderBag) -> Self {
        Self {
            command: command.into(),
            headers,
        }
    }

    /// Head for a recognized command.
    pub fn for_command(command: Command, headers: HeaderBag) -> Self {
        Self::new(command.as_str(), headers)
    }

    /// The command, if it is one the engine recognizes.
    pub fn known_command(&self) -> Option<Command> {
        Command::from_name(&self.command)
    }

    /// Shorthand for `self.headers.get(key)`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }
}
