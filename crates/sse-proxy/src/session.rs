//! A live downstream stream and the single-writer handle guarding it.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Item type of the downstream response body.
pub type BodyChunk = Result<Bytes, Infallible>;

/// Whether a write reached the downstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Delivered,
    /// The stream is done or the client has gone; nothing was written.
    Dropped,
}

/// Serialized access to one downstream event stream.
///
/// Every write is one complete event and happens under the same lock, so a
/// relayed event and an injected one can never interleave. Once the done
/// signal fires, writes become no-ops.
#[derive(Clone, Debug)]
pub struct StreamWriter {
    inner: Arc<WriterInner>,
}

#[derive(Debug)]
struct WriterInner {
    tx: Mutex<mpsc::Sender<BodyChunk>>,
    /// Clone kept outside the lock for disconnect detection.
    watch_tx: mpsc::Sender<BodyChunk>,
    done: CancellationToken,
}

impl StreamWriter {
    /// A writer feeding `tx`. The matching receiver becomes the response body.
    pub fn new(tx: mpsc::Sender<BodyChunk>) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                watch_tx: tx.clone(),
                tx: Mutex::new(tx),
                done: CancellationToken::new(),
            }),
        }
    }

    /// Write one complete event, waiting for the client to accept it.
    pub async fn write(&self, event: Bytes) -> WriteOutcome {
        let tx = self.inner.tx.lock().await;
        if self.inner.done.is_cancelled() {
            return WriteOutcome::Dropped;
        }
        tokio::select! {
            biased;
            _ = self.inner.done.cancelled() => WriteOutcome::Dropped,
            sent = tx.send(Ok(event)) => match sent {
                Ok(()) => WriteOutcome::Delivered,
                Err(_) => {
                    self.inner.done.cancel();
                    WriteOutcome::Dropped
                }
            },
        }
    }

    /// Resolves once the client has dropped the response body.
    pub async fn disconnected(&self) {
        self.inner.watch_tx.closed().await;
    }

    /// Fire the done signal. Pending and future writes are dropped.
    pub fn close(&self) {
        self.inner.done.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Resolves once the done signal has fired.
    pub async fn closed(&self) {
        self.inner.done.cancelled().await;
    }
}

/// One registered stream.
#[derive(Debug)]
pub struct Session {
    id: String,
    upstream_origin: String,
    writer: StreamWriter,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        upstream_origin: impl Into<String>,
        writer: StreamWriter,
    ) -> Self {
        Self {
            id: id.into(),
            upstream_origin: upstream_origin.into(),
            writer,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `scheme://authority` of the upstream that issued the stream.
    pub fn upstream_origin(&self) -> &str {
        &self.upstream_origin
    }

    /// Where discrete requests for this session are forwarded:
    /// `<origin>/message?sessionId=<id>`.
    pub fn message_url(&self) -> String {
        crate::target::upstream_message_url(&self.upstream_origin, &self.id)
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn write_delivers_whole_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let writer = StreamWriter::new(tx);

        assert_eq!(
            writer.write(Bytes::from_static(b"data: one\n\n")).await,
            WriteOutcome::Delivered
        );
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"data: one\n\n");
    }

    #[tokio::test]
    async fn write_after_close_is_a_silent_no_op() {
        let (tx, mut rx) = mpsc::channel(1);
        let writer = StreamWriter::new(tx);
        writer.close();

        assert!(writer.is_closed());
        assert_eq!(
            writer.write(Bytes::from_static(b"data: late\n\n")).await,
            WriteOutcome::Dropped
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_disconnect_marks_writer_done() {
        let (tx, rx) = mpsc::channel(1);
        let writer = StreamWriter::new(tx);
        drop(rx);

        tokio::time::timeout(Duration::from_secs(1), writer.disconnected())
            .await
            .expect("disconnect observed");
        assert_eq!(
            writer.write(Bytes::from_static(b"data: x\n\n")).await,
            WriteOutcome::Dropped
        );
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn close_unblocks_a_write_stuck_on_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let writer = StreamWriter::new(tx);
        assert_eq!(
            writer.write(Bytes::from_static(b"data: fills\n\n")).await,
            WriteOutcome::Delivered
        );

        let blocked = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.write(Bytes::from_static(b"data: waits\n\n")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.close();

        let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("write unblocked")
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Dropped);
    }

    #[test]
    fn session_exposes_immutable_routing() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new("abc123", "http://up.example:9000", StreamWriter::new(tx));
        assert_eq!(session.id(), "abc123");
        assert_eq!(session.upstream_origin(), "http://up.example:9000");
        assert_eq!(
            session.message_url(),
            "http://up.example:9000/message?sessionId=abc123"
        );
        assert!(!session.writer().is_closed());
    }
}
