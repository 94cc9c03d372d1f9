//! JSON-RPC shapes the gateway needs to understand.
//!
//! Only the outer envelope of a discrete request is decoded. The raw body is
//! what gets forwarded, so fields the gateway does not model survive
//! untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::Finding;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error code carried by policy-block envelopes.
pub const BLOCKED_ERROR_CODE: i64 = -32603;

/// Method name of an MCP tool invocation.
pub const TOOLS_CALL: &str = "tools/call";

/// JSON-RPC request id. Numbers are the norm; strings are accepted so that
/// clients using them are not rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Tool argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// The string payload, if this is the string variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Decoded body of a discrete request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: ToolCallParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgValue>,
}

impl ToolCallRequest {
    pub fn is_tool_call(&self) -> bool {
        self.method == TOOLS_CALL
    }

    /// `(argument name, value)` for every string-valued argument. Nested
    /// structures are not descended into.
    pub fn string_arguments(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params
            .arguments
            .iter()
            .filter_map(|(name, value)| value.as_str().map(|s| (name.as_str(), s)))
    }
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    /// Always serialized, as `null` when empty.
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC error response, delivered to the client as a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

impl ErrorEnvelope {
    /// Envelope reporting that `policy_name` withheld the request `id`.
    pub fn blocked(id: Option<RequestId>, policy_name: &str, findings: &[Finding]) -> Self {
        let mut details = String::from("Detected: ");
        for finding in findings {
            details.push_str(&finding.description);
            details.push('\n');
        }

        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code: BLOCKED_ERROR_CODE,
                message: format!(
                    "Blocked by {policy_name}. This has been blocked because it contains \
                     sensitive information. Details: {details}"
                ),
                data: None,
            },
        }
    }

    /// Render as one complete `message` event.
    pub fn to_sse_event(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("event: message\ndata: {json}\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tool_call_with_mixed_arguments() {
        let body = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"x",
            "arguments":{"secret":"AKIA...","count":3,"flag":true,"nested":{"k":"v"},"list":["a"],"none":null}}}"#;
        let req: ToolCallRequest = serde_json::from_str(body).unwrap();

        assert_eq!(req.id, Some(RequestId::Number(7)));
        assert!(req.is_tool_call());
        assert_eq!(req.params.name, "x");
        assert_eq!(req.params.arguments.len(), 6);
        assert_eq!(req.params.arguments["count"], ArgValue::Number(3.into()));
        assert_eq!(req.params.arguments["flag"], ArgValue::Bool(true));
        assert_eq!(req.params.arguments["none"], ArgValue::Null);

        let strings: Vec<_> = req.string_arguments().collect();
        assert_eq!(strings, vec![("secret", "AKIA...")]);
    }

    #[test]
    fn notification_without_id_or_params_decodes() {
        let req: ToolCallRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(req.id.is_none());
        assert!(!req.is_tool_call());
        assert!(req.params.arguments.is_empty());
    }

    #[test]
    fn string_ids_are_accepted() {
        let req: ToolCallRequest =
            serde_json::from_str(r#"{"id":"req-1","method":"tools/list","params":{}}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::String("req-1".into())));
    }

    #[test]
    fn missing_method_is_rejected() {
        assert!(serde_json::from_str::<ToolCallRequest>(r#"{"id":1}"#).is_err());
    }

    #[test]
    fn blocked_envelope_wire_shape() {
        let findings = vec![
            Finding::new("AWS Access Key ID in argument 'secret' (AKIA****)"),
            Finding::new("Private Key in argument 'pem' (----****)"),
        ];
        let envelope = ErrorEnvelope::blocked(Some(RequestId::Number(7)), "mcp-warden", &findings);
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["error"]["code"], -32603);
        assert!(json["error"]["data"].is_null());
        assert!(json["error"].as_object().unwrap().contains_key("data"));

        let message = json["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("Blocked by mcp-warden."));
        assert!(message.contains("Details: Detected: AWS Access Key ID"));
        assert!(message.contains("AKIA****\nPrivate Key"));
    }

    #[test]
    fn sse_event_is_a_single_terminated_event() {
        let envelope = ErrorEnvelope::blocked(
            Some(RequestId::Number(1)),
            "p",
            &[Finding::new("multi\nline")],
        );
        let event = envelope.to_sse_event().unwrap();
        assert!(event.starts_with("event: message\ndata: {"));
        assert!(event.ends_with("}\n\n"));
        // Newlines inside the message are JSON-escaped, so the event has
        // exactly two lines plus the terminator.
        assert_eq!(event.matches('\n').count(), 3);
    }
}
