use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::{AuditWriteError, AuditWriter};

/// Entries queued between producers and the writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Idle time after which pending writes are flushed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle for submitting [`AuditEntry`] values.
///
/// A sink created with [`AuditSink::disabled`] accepts entries and discards
/// them, so components can always hold a sink whether or not an audit file
/// was configured.
#[derive(Clone, Debug)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditSink {
    /// Open the audit file and spawn the background writer.
    ///
    /// The writer drains entries as JSON lines, flushes after
    /// [`FLUSH_INTERVAL`] of inactivity, and flushes once more when the last
    /// sink clone is dropped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);
        let writer = AuditWriter::new(path).await?;
        tracing::info!(path = %writer.path().display(), "audit log opened");

        let handle = tokio::spawn(run_writer_loop(writer, rx));

        Ok((Self { tx: Some(tx) }, handle))
    }

    /// A sink that drops every entry.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Whether entries are written anywhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an entry. Waits if the channel is full; drops the entry with a
    /// warning if the writer task is gone.
    pub async fn log(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit writer gone, entry dropped"
            );
        }
    }
}

/// Drain `rx` into `writer` until every sender is gone.
async fn run_writer_loop(mut writer: AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut dirty = false;

    loop {
        match tokio::time::timeout(FLUSH_INTERVAL, rx.recv()).await {
            Ok(Some(entry)) => match writer.write(&entry).await {
                Ok(()) => dirty = true,
                Err(err) => tracing::error!(%err, "failed to write audit entry"),
            },
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "final audit flush failed");
                    }
                }
                tracing::debug!(
                    path = %writer.path().display(),
                    entries = writer.lines_written(),
                    "audit writer stopped"
                );
                return;
            }
            Err(_) if dirty => match writer.flush().await {
                Ok(()) => dirty = false,
                Err(err) => tracing::error!(%err, "periodic audit flush failed"),
            },
            Err(_) => {}
        }
    }
}
