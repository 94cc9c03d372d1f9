//! Client → upstream discrete requests.
//!
//! Every `POST /message` is matched to its session, decoded, and, when it is
//! a tool call, run through the content policy. Allowed requests are
//! forwarded verbatim to `/message` on the upstream origin the session was
//! opened against. Blocked ones never leave the gateway: the client learns
//! about the block through an error event on its open stream.

use std::net::SocketAddr;

use audit_log::{AuditEntry, AuditEventType};
use axum::body::{self, Body, Bytes};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode};
use url::form_urlencoded;

use crate::error::GatewayError;
use crate::listener::{make_source, remote_addr, ProxyState};
use crate::policy::Finding;
use crate::protocol::{ErrorEnvelope, ToolCallRequest};
use crate::session::{Session, WriteOutcome};
use crate::target::SESSION_PARAM;
use crate::upstream::forwardable_headers;

/// Largest discrete request body accepted.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Handler for `POST /message`.
pub async fn handle_message(
    State(state): State<ProxyState>,
    req: Request,
) -> Result<Response, GatewayError> {
    let peer = remote_addr(&req);

    let session_id = session_id_param(req.uri().query()).ok_or(GatewayError::MissingSessionId)?;
    let session = state
        .registry
        .get(&session_id)
        .ok_or(GatewayError::SessionNotFound)?;

    let (parts, body) = req.into_parts();
    let body = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(GatewayError::ReadRequest)?;
    let request: ToolCallRequest = serde_json::from_slice(&body)?;

    if request.is_tool_call() {
        let findings = state.config.policy.inspect(&request);
        if !findings.is_empty() {
            block(&state, &session, &request, &findings, peer).await;
            return Ok((StatusCode::ACCEPTED, "Accepted").into_response());
        }
    }

    forward(&state, &session, &parts.headers, body, &request, peer).await
}

/// Non-empty `sessionId` from the request query.
fn session_id_param(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == SESSION_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}

/// Deliver the block notice on the session's stream and record the
/// decision. The notice is dropped silently if the stream is already done.
async fn block(
    state: &ProxyState,
    session: &Session,
    request: &ToolCallRequest,
    findings: &[Finding],
    peer: Option<SocketAddr>,
) {
    let policy_name = state.config.policy.name();
    let envelope = ErrorEnvelope::blocked(request.id.clone(), policy_name, findings);

    match envelope.to_sse_event() {
        Ok(event) => {
            if session.writer().write(Bytes::from(event)).await == WriteOutcome::Dropped {
                tracing::debug!(
                    session_id = %session.id(),
                    "stream already closed, block notice dropped"
                );
            }
        }
        Err(err) => {
            tracing::error!(session_id = %session.id(), %err, "failed to encode block notice");
        }
    }

    tracing::warn!(
        session_id = %session.id(),
        tool = %request.params.name,
        findings = findings.len(),
        "tool call blocked"
    );

    let arguments: Vec<&str> = request.params.arguments.keys().map(String::as_str).collect();
    let descriptions: Vec<&str> = findings.iter().map(|f| f.description.as_str()).collect();
    state
        .config
        .audit
        .log(AuditEntry::new(
            AuditEventType::RequestBlocked,
            make_source(Some(session.id()), Some(session.upstream_origin()), peer),
            serde_json::json!({
                "policy": policy_name,
                "tool": request.params.name,
                "request_id": request.id,
                "arguments": arguments,
                "findings": descriptions,
            }),
        ))
        .await;
}

/// Send the original body to the session's upstream message URL and relay
/// the answer back unchanged.
async fn forward(
    state: &ProxyState,
    session: &Session,
    headers: &HeaderMap,
    body: Bytes,
    request: &ToolCallRequest,
    peer: Option<SocketAddr>,
) -> Result<Response, GatewayError> {
    let endpoint = session.message_url();

    let upstream = match state
        .clients
        .message
        .post(&endpoint)
        .headers(forwardable_headers(headers))
        .body(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(
                session_id = %session.id(),
                upstream = %session.upstream_origin(),
                %err,
                "upstream unreachable for discrete request"
            );
            state
                .config
                .audit
                .log(AuditEntry::new(
                    AuditEventType::UpstreamUnreachable,
                    make_source(Some(session.id()), Some(session.upstream_origin()), peer),
                    serde_json::json!({ "method": request.method, "error": err.to_string() }),
                ))
                .await;
            return Err(GatewayError::Upstream(err));
        }
    };

    let status = upstream.status();
    let response_headers = forwardable_headers(upstream.headers());
    let bytes = upstream.bytes().await.map_err(GatewayError::ReadBody)?;

    tracing::debug!(
        session_id = %session.id(),
        method = %request.method,
        %status,
        "request forwarded"
    );
    state
        .config
        .audit
        .log(AuditEntry::new(
            AuditEventType::RequestForwarded,
            make_source(Some(session.id()), Some(session.upstream_origin()), peer),
            serde_json::json!({
                "method": request.method,
                "tool": request.is_tool_call().then_some(request.params.name.as_str()),
                "request_id": request.id,
                "status": status.as_u16(),
            }),
        ))
        .await;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_from_query() {
        assert_eq!(session_id_param(Some("sessionId=abc123")).as_deref(), Some("abc123"));
        assert_eq!(
            session_id_param(Some("x=1&sessionId=a%20b")).as_deref(),
            Some("a b")
        );
        assert_eq!(session_id_param(Some("sessionId=")), None);
        assert_eq!(session_id_param(Some("other=1")), None);
        assert_eq!(session_id_param(None), None);
    }
}
