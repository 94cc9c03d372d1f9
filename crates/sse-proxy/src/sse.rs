//! Incremental `text/event-stream` framing.
//!
//! Upstream bytes arrive in arbitrary chunks. [`LineSplitter`] turns them
//! into lines that keep their original terminator, and [`EventFrame`]
//! gathers lines until the blank line that ends an event. Nothing is
//! re-encoded, so unmodified events leave the gateway byte-for-byte.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Longest line accepted from an upstream, terminator excluded.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// An upstream line outgrew the splitter's limit.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Splits bytes into lines ended by `\r\n`, `\n` or a lone `\r`.
#[derive(Debug)]
pub struct LineSplitter {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no terminator.
    scanned: usize,
    max_line: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            max_line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line including its terminator.
    ///
    /// A `\r` at the very end of the buffered bytes is held back until the
    /// next byte shows whether it starts a `\r\n`.
    pub fn next_line(&mut self) -> Result<Option<Bytes>, LineTooLong> {
        let found = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map(|offset| self.scanned + offset);

        let Some(pos) = found else {
            self.scanned = self.buf.len();
            return self.check_len(self.buf.len()).map(|()| None);
        };
        self.check_len(pos)?;

        let end = match (self.buf[pos], self.buf.get(pos + 1)) {
            (b'\r', Some(b'\n')) => pos + 2,
            (b'\r', None) => {
                self.scanned = pos;
                return Ok(None);
            }
            _ => pos + 1,
        };

        self.scanned = 0;
        Ok(Some(self.buf.split_to(end).freeze()))
    }

    fn check_len(&self, len: usize) -> Result<(), LineTooLong> {
        if len > self.max_line {
            Err(LineTooLong {
                limit: self.max_line,
            })
        } else {
            Ok(())
        }
    }

    /// Bytes after the last terminator, if any.
    pub fn take_remainder(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

/// Accumulates the lines of one event.
#[derive(Debug, Default)]
pub struct EventFrame {
    buf: BytesMut,
}

impl EventFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `line`; returns the whole event once `line` is the blank
    /// terminator.
    pub fn push_line(&mut self, line: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(line);
        if is_blank(line) {
            Some(self.buf.split().freeze())
        } else {
            None
        }
    }

    /// Lines received since the last complete event.
    pub fn take_partial(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

/// Split `line` into content and terminator (`"\r\n"`, `"\n"`, `"\r"` or
/// empty).
pub fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") || line.ends_with(b"\r") {
        line.split_at(line.len() - 1)
    } else {
        (line, &[])
    }
}

pub fn is_blank(line: &[u8]) -> bool {
    split_terminator(line).0.is_empty()
}

/// Parse `name: value` from line content. Comments and blank lines yield
/// `None`; a single space after the colon is not part of the value.
pub fn field(content: &str) -> Option<(&str, &str)> {
    if content.is_empty() || content.starts_with(':') {
        return None;
    }
    match content.split_once(':') {
        Some((name, value)) => Some((name, value.strip_prefix(' ').unwrap_or(value))),
        None => Some((content, "")),
    }
}
