//! Upstream → client event stream relay.
//!
//! The downstream response is returned as soon as the upstream answers; a
//! spawned task then copies events across one at a time through the
//! session's [`StreamWriter`]. The first `endpoint` event is where the
//! upstream announces its session id: the session is registered before that
//! event reaches the client, and the advertised URL is replaced with the
//! gateway's own `/message` endpoint so every discrete request comes back
//! through inspection.

use std::net::SocketAddr;

use audit_log::{AuditEntry, AuditEventType};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{self, HeaderValue};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use crate::error::GatewayError;
use crate::listener::{make_source, remote_addr, ProxyState};
use crate::registry::SessionLease;
use crate::session::{BodyChunk, Session, StreamWriter, WriteOutcome};
use crate::sse::{self, EventFrame, LineSplitter, LineTooLong};
use crate::target::{self, TargetError};

/// Handler for `GET /sse` and `GET /`.
pub async fn open_stream(
    State(state): State<ProxyState>,
    req: Request,
) -> Result<Response, GatewayError> {
    let raw_query = req.uri().query().unwrap_or("");
    let peer = remote_addr(&req);

    // ------------------------------------------------------------------
    // 1. Resolve the upstream stream URL.
    // ------------------------------------------------------------------
    let target = target::extract_target_url(raw_query).ok_or(TargetError::Missing)?;
    let resolved = target::resolve_upstream(&target, &state.config.loopback)?;
    let stream_url = target::stream_request_url(&resolved, raw_query);
    let origin = target::upstream_origin(&stream_url);

    // ------------------------------------------------------------------
    // 2. Open the upstream stream.
    // ------------------------------------------------------------------
    let upstream = match state
        .clients
        .stream
        .get(stream_url.clone())
        .headers(crate::upstream::forwardable_headers(req.headers()))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(upstream = %origin, %err, "upstream stream unreachable");
            state
                .config
                .audit
                .log(AuditEntry::new(
                    AuditEventType::UpstreamUnreachable,
                    make_source(None, Some(origin.as_str()), peer),
                    serde_json::json!({ "path": stream_url.path(), "error": err.to_string() }),
                ))
                .await;
            return Err(GatewayError::Upstream(err));
        }
    };

    tracing::info!(
        upstream = %origin,
        status = %upstream.status(),
        remote_addr = ?peer,
        "stream opened"
    );

    // ------------------------------------------------------------------
    // 3. Build the streaming downstream response.
    // ------------------------------------------------------------------
    let (tx, rx) = mpsc::channel::<BodyChunk>(1);
    let writer = StreamWriter::new(tx);

    let mut headers = crate::upstream::forwardable_headers(upstream.headers());
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

    let mut builder = Response::builder().status(upstream.status());
    if let Some(slot) = builder.headers_mut() {
        *slot = headers;
    }
    let response = builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| GatewayError::StreamUnavailable(e.to_string()))?;

    // ------------------------------------------------------------------
    // 4. Relay events in the background.
    // ------------------------------------------------------------------
    let relay = StreamRelay {
        state,
        stream_url,
        origin,
        peer,
        writer,
        endpoint: EndpointState::Awaiting,
        lease: None,
    };
    tokio::spawn(relay.run(upstream));

    Ok(response)
}

/// Progress through the session-establishing `endpoint` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointState {
    Awaiting,
    /// Inside the first `endpoint` event, before its data line.
    InEvent,
    Seen,
}

struct StreamRelay {
    state: ProxyState,
    stream_url: Url,
    origin: String,
    peer: Option<SocketAddr>,
    writer: StreamWriter,
    endpoint: EndpointState,
    lease: Option<SessionLease>,
}

/// Why the relay loop stopped.
#[derive(Debug)]
enum StopReason {
    UpstreamEnded,
    UpstreamError(reqwest::Error),
    /// The upstream sent a line longer than the splitter accepts.
    LineTooLong(LineTooLong),
    ClientGone,
    Shutdown,
}

impl StreamRelay {
    async fn run(mut self, upstream: reqwest::Response) {
        let chunks = upstream.bytes_stream();
        tokio::pin!(chunks);

        let mut lines = LineSplitter::new();
        let mut frame = EventFrame::new();

        let reason = 'relay: loop {
            let next = tokio::select! {
                next = chunks.next() => next,
                _ = self.writer.disconnected() => break 'relay StopReason::ClientGone,
                _ = self.state.shutdown.cancelled() => break 'relay StopReason::Shutdown,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => break 'relay StopReason::UpstreamError(err),
                None => break 'relay StopReason::UpstreamEnded,
            };

            lines.push(&chunk);
            loop {
                let line = match lines.next_line() {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => break 'relay StopReason::LineTooLong(err),
                };
                let line = self.on_line(line).await;
                if let Some(event) = frame.push_line(&line) {
                    if self.writer.write(event).await == WriteOutcome::Dropped {
                        break 'relay StopReason::ClientGone;
                    }
                }
            }
        };

        // Flush whatever the upstream sent after its last complete event.
        if matches!(reason, StopReason::UpstreamEnded | StopReason::UpstreamError(_)) {
            if let Some(rest) = lines.take_remainder() {
                let rest = self.on_line(rest).await;
                frame.push_line(&rest);
            }
            if let Some(partial) = frame.take_partial() {
                self.writer.write(partial).await;
            }
        }

        match &reason {
            StopReason::UpstreamError(err) => {
                tracing::warn!(upstream = %self.origin, %err, "upstream stream read failed");
            }
            StopReason::LineTooLong(err) => {
                tracing::warn!(upstream = %self.origin, %err, "upstream line too long, ending stream");
            }
            other => tracing::debug!(upstream = %self.origin, reason = ?other, "stream relay stopped"),
        }

        self.writer.close();
        if let Some(lease) = self.lease.take() {
            let session_id = lease.session().id().to_string();
            drop(lease);
            tracing::info!(%session_id, upstream = %self.origin, "session closed");
            self.state
                .config
                .audit
                .log(AuditEntry::new(
                    AuditEventType::SessionClosed,
                    make_source(Some(session_id.as_str()), Some(self.origin.as_str()), self.peer),
                    serde_json::json!({ "reason": format!("{reason:?}") }),
                ))
                .await;
        }
    }

    /// Track the endpoint event and rewrite its data line. Every other line
    /// is returned untouched.
    async fn on_line(&mut self, line: Bytes) -> Bytes {
        if self.endpoint == EndpointState::Seen {
            return line;
        }

        let (content, terminator) = sse::split_terminator(&line);
        if content.is_empty() {
            // An endpoint event without a data line does not count.
            if self.endpoint == EndpointState::InEvent {
                self.endpoint = EndpointState::Awaiting;
            }
            return line;
        }

        let Ok(text) = std::str::from_utf8(content) else {
            return line;
        };
        let advertised = match (self.endpoint, sse::field(text)) {
            (EndpointState::Awaiting, Some(("event", "endpoint"))) => {
                self.endpoint = EndpointState::InEvent;
                None
            }
            (EndpointState::InEvent, Some(("data", advertised))) => Some(advertised.to_string()),
            _ => None,
        };
        let Some(advertised) = advertised else {
            return line;
        };

        let rewritten = self.establish(&advertised).await;
        self.endpoint = EndpointState::Seen;

        let mut out = Vec::with_capacity(rewritten.len() + 8);
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(rewritten.as_bytes());
        out.extend_from_slice(terminator);
        Bytes::from(out)
    }

    /// Register the session announced by `advertised` and return the URL
    /// the client should use instead.
    async fn establish(&mut self, advertised: &str) -> String {
        let public_url = &self.state.config.public_url;

        let session_id = match target::advertised_session_id(&self.stream_url, advertised) {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::warn!(
                    upstream = %self.origin,
                    endpoint = %advertised,
                    "endpoint event without a session id, not registering"
                );
                return target::gateway_endpoint(public_url, None);
            }
            Err(err) => {
                tracing::warn!(upstream = %self.origin, %err, "unusable endpoint URL from upstream");
                return target::gateway_endpoint(public_url, None);
            }
        };

        let session = Session::new(session_id.as_str(), self.origin.as_str(), self.writer.clone());
        self.lease = Some(self.state.registry.register(session));

        tracing::info!(%session_id, upstream = %self.origin, "session registered");
        self.state
            .config
            .audit
            .log(AuditEntry::new(
                AuditEventType::SessionOpened,
                make_source(Some(session_id.as_str()), Some(self.origin.as_str()), self.peer),
                serde_json::json!({ "advertised_endpoint": advertised }),
            ))
            .await;

        target::gateway_endpoint(public_url, Some(session_id.as_str()))
    }
}
