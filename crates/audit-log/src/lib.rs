//! JSON-lines audit trail for mcp-warden.
//!
//! Every decision the gateway takes about a session or a tool call (session
//! registered, request forwarded, request blocked, upstream unreachable) is
//! recorded as one JSON object per line. Entries carry argument names and
//! finding descriptions, never raw argument values.
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("audit.jsonl").await?;
//! sink.log(AuditEntry::new(
//!     AuditEventType::ProcessStarted,
//!     AuditSource::new("mcp-warden"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, AuditSource};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
