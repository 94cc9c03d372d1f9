use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::entry::AuditEntry;

/// Failures of the audit file itself.
///
/// Filesystem errors name the audit file so an operator can tell which
/// deployment path is misconfigured.
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("failed to create audit log directory for {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open audit log {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to append to audit log {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to flush audit log {path}: {source}")]
    Flush {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The gateway's audit file, opened for appending.
///
/// Existing content is never truncated: a restarted gateway continues the
/// same trail. Each [`write`](Self::write) appends exactly one JSON object
/// followed by `\n`.
pub struct AuditWriter {
    path: PathBuf,
    file: tokio::fs::File,
    lines: u64,
}

impl AuditWriter {
    /// Open `path` for appending, creating the file and any missing parent
    /// directories. A bare file name is opened in the working directory.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| AuditWriteError::CreateDir {
                    path: path.clone(),
                    source,
                })?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| AuditWriteError::OpenFile {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended since this writer was opened.
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Append `entry` as one JSON line. The bytes may sit in the OS buffer
    /// until [`flush`](Self::flush).
    pub async fn write(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .map_err(|source| AuditWriteError::Write {
                path: self.path.clone(),
                source,
            })?;
        self.lines += 1;
        Ok(())
    }

    /// Push appended lines through to the file.
    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.file
            .flush()
            .await
            .map_err(|source| AuditWriteError::Flush {
                path: self.path.clone(),
                source,
            })
    }
}
