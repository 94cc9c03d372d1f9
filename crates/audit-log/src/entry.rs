use serde::{Deserialize, Serialize};

/// One line of the audit trail.
///
/// `details` holds event-specific fields such as the policy name, tool name,
/// argument names and finding descriptions. It never carries raw argument
/// values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique per entry, so duplicates can be spotted after log shipping.
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Stamp a new entry with a fresh UUID v4 and the current UTC time.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// The upstream assigned a session id and the gateway registered it.
    SessionOpened,
    /// The stream ended and the session was removed from the registry.
    SessionClosed,
    /// A discrete request passed inspection and was sent upstream.
    RequestForwarded,
    /// A tool call was withheld because the content policy reported findings.
    RequestBlocked,
    /// The upstream could not be reached for a stream or a discrete request.
    UpstreamUnreachable,
    /// The gateway process came up; details carry version and listen address.
    ProcessStarted,
    /// The gateway process is exiting.
    ProcessStopped,
    /// A client configuration file was rewritten to route through the gateway.
    ConfigRewritten,
}

/// Which component emitted the entry, plus optional request context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    /// Emitting component, e.g. `sse-proxy` or `mcp-warden`.
    pub component: String,
    /// Upstream-assigned session id, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Downstream client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    /// Upstream origin, `scheme://host[:port]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

impl AuditSource {
    /// Source with only the component set.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            session_id: None,
            remote_addr: None,
            upstream: None,
        }
    }

    /// Attach the session the event belongs to.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the upstream origin involved.
    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    /// Attach the downstream client address.
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::RequestBlocked).unwrap();
        assert_eq!(json, "\"request_blocked\"");
    }

    #[test]
    fn empty_source_fields_are_omitted() {
        let entry = AuditEntry::new(
            AuditEventType::ProcessStarted,
            AuditSource::new("mcp-warden"),
            serde_json::json!({}),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"component\":\"mcp-warden\""));
        assert!(!json.contains("session_id"));
        assert!(!json.contains("upstream"));
    }

    #[test]
    fn builder_sets_context() {
        let source = AuditSource::new("relay")
            .with_session("abc123")
            .with_upstream("http://up.example:9000");
        assert_eq!(source.session_id.as_deref(), Some("abc123"));
        assert_eq!(source.upstream.as_deref(), Some("http://up.example:9000"));
        assert!(source.remote_addr.is_none());
    }
}
