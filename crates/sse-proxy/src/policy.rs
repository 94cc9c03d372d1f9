//! Content policy contract.
//!
//! A policy looks at one decoded request and reports why it must not be
//! forwarded. An empty result means the request is allowed. Implementations
//! are synchronous and must not perform I/O; the interceptor calls them on
//! the request path.

use crate::protocol::ToolCallRequest;

/// One reason a request is unsafe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub description: String,
}

impl Finding {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

pub trait ContentPolicy: Send + Sync {
    /// Name shown to the client in block messages.
    fn name(&self) -> &str;

    /// Findings for `request`, in a stable order.
    fn inspect(&self, request: &ToolCallRequest) -> Vec<Finding>;
}

/// Policy that never objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ContentPolicy for AllowAll {
    fn name(&self) -> &str {
        "allow-all"
    }

    fn inspect(&self, _request: &ToolCallRequest) -> Vec<Finding> {
        Vec::new()
    }
}
