//! Inbound frames: a parsed head plus a body that is still arriving.

use bytes::{Bytes, BytesMut};
use stomper_protocol::{Command, FrameHead, HeaderBag};
use tokio::sync::mpsc;

use crate::SessionError;

/// Body events pushed by the reader task.
pub(crate) enum BodyEvent {
    Chunk(Bytes),
    End,
}

/// A received frame.
///
/// The head is complete when the frame is dispatched; the body is pulled
/// with [`chunk`](Self::chunk) or [`read_to_end`](Self::read_to_end) while
/// the reader task keeps feeding it. Bodies are consumed once, front to
/// back.
///
/// Dropping the frame discards whatever of the body hasn't been read.
pub struct InboundFrame {
    head: FrameHead,
    body: mpsc::Receiver<BodyEvent>,
    ended: bool,
}

impl InboundFrame {
    pub(crate) fn channel(head: FrameHead, capacity: usize) -> (mpsc::Sender<BodyEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                head,
                body: rx,
                ended: false,
            },
        )
    }

    pub fn command(&self) -> &str {
        &self.head.command
    }

    /// The command, if it is one the engine recognizes.
    pub fn known_command(&self) -> Option<Command> {
        self.head.known_command()
    }

    pub fn headers(&self) -> &HeaderBag {
        &self.head.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.head.header(key)
    }

    pub fn head(&self) -> &FrameHead {
        &self.head
    }

    /// Whether the end of the body has been reported.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Next body chunk, or `Ok(None)` once the body has ended.
    ///
    /// The first `Ok(None)` is the end-of-body signal; later calls return
    /// `Ok(None)` again without touching the stream.
    ///
    /// # Errors
    /// [`SessionError::BodyTruncated`] if the connection went down before
    /// the frame terminator arrived.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, SessionError> {
        if self.ended {
            return Ok(None);
        }
        match self.body.recv().await {
            Some(BodyEvent::Chunk(bytes)) => Ok(Some(bytes)),
            Some(BodyEvent::End) => {
                self.ended = true;
                Ok(None)
            }
            None => Err(SessionError::BodyTruncated),
        }
    }

    /// Collects the rest of the body.
    pub async fn read_to_end(&mut self) -> Result<Bytes, SessionError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Reads and discards the rest of the body.
    pub async fn drain(&mut self) -> Result<usize, SessionError> {
        let mut n = 0;
        while let Some(chunk) = self.chunk().await? {
            n += chunk.len();
        }
        Ok(n)
    }
}

impl std::fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundFrame")
            .field("head", &self.head)
            .field("ended", &self.ended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head() -> FrameHead {
        FrameHead::for_command(Command::Message, HeaderBag::new())
    }

    #[tokio::test]
    async fn test_chunk_reports_end_exactly_once_then_stays_ended() {
        let (tx, mut frame) = InboundFrame::channel(head(), 4);
        tx.send(BodyEvent::Chunk(Bytes::from_static(b"ab"))).await.unwrap();
        tx.send(BodyEvent::End).await.unwrap();
        drop(tx);

        assert_eq!(frame.chunk().await.unwrap(), Some(Bytes::from_static(b"ab")));
        assert_eq!(frame.chunk().await.unwrap(), None);
        assert!(frame.is_ended());
        assert_eq!(frame.chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_chunk_without_end_is_truncated() {
        let (tx, mut frame) = InboundFrame::channel(head(), 4);
        tx.send(BodyEvent::Chunk(Bytes::from_static(b"half"))).await.unwrap();
        drop(tx);

        assert_eq!(frame.chunk().await.unwrap(), Some(Bytes::from_static(b"half")));
        assert!(matches!(frame.chunk().await, Err(SessionError::BodyTruncated)));
        assert!(!frame.is_ended());
    }
}
