//! Outbound frames and the per-connection frame slot.
//!
//! Only one frame may be on the wire at a time: its head, body chunks and
//! terminator must not interleave with another frame's bytes. The slot is a
//! fair (FIFO) async mutex; holding its guard is the right to write.

use bytes::{Bytes, BytesMut};
use stomper_protocol::{FRAME_TERMINATOR, FrameHead, encode_frame, encode_head};
use tokio::sync::{OwnedMutexGuard, mpsc, oneshot};

use crate::SessionError;

/// Work for the connection's writer task.
pub(crate) enum WriteCommand {
    Write(Bytes),
    /// Flush everything queued so far, close the transport, then signal.
    Close(oneshot::Sender<()>),
}

/// Sending side of the writer queue. Lives inside the slot mutex.
pub(crate) struct FrameSlot {
    tx: mpsc::Sender<WriteCommand>,
}

impl FrameSlot {
    pub(crate) fn new(tx: mpsc::Sender<WriteCommand>) -> Self {
        Self { tx }
    }

    pub(crate) async fn write(&self, bytes: Bytes) -> Result<(), SessionError> {
        self.command(WriteCommand::Write(bytes)).await
    }

    pub(crate) async fn command(&self, command: WriteCommand) -> Result<(), SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::Destroyed)
    }
}

/// The exclusive right to write the next frame.
///
/// Obtained from [`SessionHandle::reserve`](crate::SessionHandle::reserve).
/// Lets a caller make a decision and put the resulting frame on the wire
/// without another frame slipping in between.
pub struct FrameReservation {
    guard: OwnedMutexGuard<FrameSlot>,
}

impl FrameReservation {
    pub(crate) fn new(guard: OwnedMutexGuard<FrameSlot>) -> Self {
        Self { guard }
    }

    /// Writes a complete frame and gives the slot up.
    pub async fn send(self, head: &FrameHead, body: &[u8]) -> Result<(), SessionError> {
        let bytes = encode_frame(head, body)?;
        self.send_encoded(bytes).await
    }

    pub(crate) async fn send_encoded(self, bytes: Bytes) -> Result<(), SessionError> {
        self.guard.write(bytes).await
    }

    /// Queues a transport close behind everything already written.
    pub(crate) async fn close(self, done: oneshot::Sender<()>) -> Result<(), SessionError> {
        self.guard.command(WriteCommand::Close(done)).await
    }

    /// Writes the head and keeps the slot until the returned frame ends.
    pub async fn open(self, head: &FrameHead) -> Result<OutboundFrame, SessionError> {
        OutboundFrame::start(self.guard, head).await
    }
}

/// A frame whose head has been written and whose body is still open.
///
/// ```text
///   open ──write()*──→ end() / end_with()  ──→ ended (writes rejected)
/// ```
///
/// The frame holds the connection's frame slot until it ends, so other
/// frames queue behind it. A frame dropped without `end()` is terminated in
/// the background so the byte stream stays aligned. A body shorter than its
/// declared `content-length` is padded with zero bytes before the
/// terminator; the peer reads exactly the declared length.
pub struct OutboundFrame {
    guard: Option<OwnedMutexGuard<FrameSlot>>,
    command: String,
    declared: Option<usize>,
    written: usize,
}

impl OutboundFrame {
    async fn start(guard: OwnedMutexGuard<FrameSlot>, head: &FrameHead) -> Result<Self, SessionError> {
        let declared = head.headers.content_length()?;
        let mut buf = BytesMut::new();
        encode_head(head, &mut buf)?;
        guard.write(buf.freeze()).await?;
        tracing::trace!(command = %head.command, "frame opened");
        Ok(Self {
            guard: Some(guard),
            command: head.command.clone(),
            declared,
            written: 0,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Body bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn is_ended(&self) -> bool {
        self.guard.is_none()
    }

    /// Appends body bytes. Waits while the writer queue is full.
    ///
    /// # Errors
    /// - [`SessionError::FrameEnded`] after `end()`
    /// - [`SessionError::BodyLength`] when this would exceed a declared
    ///   `content-length`
    /// - [`SessionError::Destroyed`] when the connection is gone
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), SessionError> {
        let guard = self.guard.as_ref().ok_or(SessionError::FrameEnded)?;
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        let written = self.written + chunk.len();
        if let Some(declared) = self.declared {
            if written > declared {
                return Err(SessionError::BodyLength { declared, written });
            }
        }
        guard.write(chunk).await?;
        self.written = written;
        Ok(())
    }

    /// Writes the terminator and releases the frame slot.
    ///
    /// # Errors
    /// [`SessionError::FrameEnded`] on a second call. A body shorter than
    /// its declared `content-length` fails with
    /// [`SessionError::BodyLength`]; the frame is still padded to the
    /// declared length and terminated.
    pub async fn end(&mut self) -> Result<(), SessionError> {
        let guard = self.guard.take().ok_or(SessionError::FrameEnded)?;
        guard.write(tail(self.declared, self.written)).await?;
        tracing::trace!(command = %self.command, bytes = self.written, "frame ended");
        match self.declared {
            Some(declared) if declared != self.written => Err(SessionError::BodyLength {
                declared,
                written: self.written,
            }),
            _ => Ok(()),
        }
    }

    /// `write(chunk)` followed by `end()`.
    pub async fn end_with(&mut self, chunk: impl Into<Bytes>) -> Result<(), SessionError> {
        self.write(chunk).await?;
        self.end().await
    }
}

impl Drop for OutboundFrame {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        tracing::debug!(command = %self.command, "outbound frame dropped before end");
        let bytes = tail(self.declared, self.written);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = guard.write(bytes).await;
                });
            }
            Err(_) => tracing::warn!(command = %self.command, "no runtime to terminate frame"),
        }
    }
}

/// Zero padding up to the declared length, then the terminator.
fn tail(declared: Option<usize>, written: usize) -> Bytes {
    let missing = declared.map_or(0, |declared| declared.saturating_sub(written));
    if missing == 0 {
        return Bytes::from_static(&[FRAME_TERMINATOR]);
    }
    let mut buf = BytesMut::zeroed(missing + 1);
    buf[missing] = FRAME_TERMINATOR;
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stomper_protocol::{Command, HeaderBag, header};
    use tokio::sync::Mutex;

    use super::*;

    fn slot() -> (Arc<Mutex<FrameSlot>>, mpsc::Receiver<WriteCommand>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Mutex::new(FrameSlot::new(tx))), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<WriteCommand>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if let WriteCommand::Write(bytes) = command {
                out.extend_from_slice(&bytes);
            }
        }
        out
    }

    fn send_head() -> FrameHead {
        FrameHead::for_command(Command::Send, HeaderBag::new().with(header::DESTINATION, "/q"))
    }

    #[tokio::test]
    async fn test_write_then_end_produces_one_frame() {
        let (slot, mut rx) = slot();
        let reservation = FrameReservation::new(slot.lock_owned().await);
        let mut frame = reservation.open(&send_head()).await.unwrap();

        frame.write("abcd").await.unwrap();
        frame.end_with("efgh").await.unwrap();

        assert_eq!(drain(&mut rx), b"SEND\ndestination:/q\n\nabcdefgh\0");
    }

    #[tokio::test]
    async fn test_write_after_end_is_error() {
        let (slot, _rx) = slot();
        let mut frame = FrameReservation::new(slot.lock_owned().await)
            .open(&send_head())
            .await
            .unwrap();
        frame.end().await.unwrap();

        assert!(matches!(frame.write("x").await, Err(SessionError::FrameEnded)));
        assert!(matches!(frame.end().await, Err(SessionError::FrameEnded)));
    }

    #[tokio::test]
    async fn test_end_releases_slot_for_next_frame() {
        let (slot, _rx) = slot();
        let mut frame = FrameReservation::new(Arc::clone(&slot).lock_owned().await)
            .open(&send_head())
            .await
            .unwrap();

        assert!(slot.try_lock().is_err());
        frame.end().await.unwrap();
        assert!(slot.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_write_beyond_declared_length_is_rejected() {
        let (slot, mut rx) = slot();
        let mut head = send_head();
        head.headers.set(header::CONTENT_LENGTH, "3");
        let mut frame = FrameReservation::new(slot.lock_owned().await)
            .open(&head)
            .await
            .unwrap();

        assert!(matches!(
            frame.write("abcd").await,
            Err(SessionError::BodyLength { declared: 3, written: 4 })
        ));
        frame.end_with("abc").await.unwrap();
        assert!(drain(&mut rx).ends_with(b"\n\nabc\0"));
    }

    #[tokio::test]
    async fn test_drop_without_end_writes_terminator() {
        let (slot, mut rx) = slot();
        {
            let mut frame = FrameReservation::new(Arc::clone(&slot).lock_owned().await)
                .open(&send_head())
                .await
                .unwrap();
            frame.write("partial").await.unwrap();
        }
        // The background terminator holds the slot until it is written.
        let _next = slot.lock().await;
        assert!(drain(&mut rx).ends_with(b"partial\0"));
    }

    #[tokio::test]
    async fn test_short_body_is_padded_to_declared_length() {
        let (slot, mut rx) = slot();
        let mut head = send_head();
        head.headers.set(header::CONTENT_LENGTH, "5");
        let mut frame = FrameReservation::new(slot.lock_owned().await)
            .open(&head)
            .await
            .unwrap();
        frame.write("ab").await.unwrap();

        assert!(matches!(
            frame.end().await,
            Err(SessionError::BodyLength { declared: 5, written: 2 })
        ));
        assert!(frame.is_ended());
        assert!(drain(&mut rx).ends_with(b"\n\nab\0\0\0\0"));
    }

    #[tokio::test]
    async fn test_drop_of_short_declared_body_pads_before_terminator() {
        let (slot, mut rx) = slot();
        let mut head = send_head();
        head.headers.set(header::CONTENT_LENGTH, "4");
        {
            let mut frame = FrameReservation::new(Arc::clone(&slot).lock_owned().await)
                .open(&head)
                .await
                .unwrap();
            frame.write("x").await.unwrap();
        }
        let _next = slot.lock().await;
        assert!(drain(&mut rx).ends_with(b"\n\nx\0\0\0\0"));
    }
}
