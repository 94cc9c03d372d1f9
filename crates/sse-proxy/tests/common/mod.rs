//! Shared fixtures: a mock MCP server, a gateway on an ephemeral port, and
//! an event reader for the client side of a stream.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use audit_log::AuditSink;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use sse_proxy::sse::{EventFrame, LineSplitter};
use sse_proxy::{ContentPolicy, Finding, LoopbackRewrite, Proxy, ProxyConfig, ProxyState, ToolCallRequest};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub const STEP: Duration = Duration::from_secs(5);

// ---- Mock upstream ----

#[derive(Clone)]
struct MockState {
    first: String,
    feed: Arc<Mutex<Option<mpsc::Receiver<String>>>>,
    messages: Arc<Mutex<Vec<Bytes>>>,
    message_queries: Arc<Mutex<Vec<String>>>,
    stream_queries: Arc<Mutex<Vec<String>>>,
}

/// An MCP server that opens one stream with a fixed first chunk and then
/// relays whatever the test feeds it.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub feed: mpsc::Sender<String>,
    messages: Arc<Mutex<Vec<Bytes>>>,
    message_queries: Arc<Mutex<Vec<String>>>,
    stream_queries: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub async fn start(first: &str) -> Self {
        Self::start_with(|_| first.to_string()).await
    }

    /// Like [`start`](Self::start), with a first chunk that can name the
    /// server's own address.
    pub async fn start_with(first: impl FnOnce(SocketAddr) -> String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (feed, rx) = mpsc::channel(64);
        let state = MockState {
            first: first(addr),
            feed: Arc::new(Mutex::new(Some(rx))),
            messages: Arc::new(Mutex::new(Vec::new())),
            message_queries: Arc::new(Mutex::new(Vec::new())),
            stream_queries: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/sse", get(mock_stream))
            .route("/message", post(mock_message))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            feed,
            messages: state.messages,
            message_queries: state.message_queries,
            stream_queries: state.stream_queries,
        }
    }

    pub fn stream_url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    pub async fn messages(&self) -> Vec<Bytes> {
        self.messages.lock().await.clone()
    }

    /// Query strings of the discrete requests received on `/message`.
    pub async fn message_queries(&self) -> Vec<String> {
        self.message_queries.lock().await.clone()
    }

    pub async fn stream_queries(&self) -> Vec<String> {
        self.stream_queries.lock().await.clone()
    }
}

async fn mock_stream(State(state): State<MockState>, uri: Uri) -> Response {
    state
        .stream_queries
        .lock()
        .await
        .push(uri.query().unwrap_or_default().to_string());

    let first = stream::iter([Ok::<_, Infallible>(Bytes::from(state.first.clone()))]);
    let rest: BoxStream<'static, Result<Bytes, Infallible>> = match state.feed.lock().await.take() {
        Some(rx) => ReceiverStream::new(rx).map(|event| Ok(Bytes::from(event))).boxed(),
        None => stream::empty().boxed(),
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header("x-upstream", "mock")
        .body(Body::from_stream(first.chain(rest)))
        .unwrap()
}

async fn mock_message(State(state): State<MockState>, uri: Uri, body: Bytes) -> impl IntoResponse {
    state
        .message_queries
        .lock()
        .await
        .push(uri.query().unwrap_or_default().to_string());
    state.messages.lock().await.push(body);
    let mut headers = HeaderMap::new();
    headers.insert("x-upstream", "mock".parse().unwrap());
    (StatusCode::ACCEPTED, headers, "Accepted")
}

// ---- Gateway ----

/// Flags any string argument containing an AWS-style key prefix.
pub struct KeyPrefixPolicy;

impl ContentPolicy for KeyPrefixPolicy {
    fn name(&self) -> &str {
        "mcp-warden"
    }

    fn inspect(&self, request: &ToolCallRequest) -> Vec<Finding> {
        request
            .string_arguments()
            .filter(|(_, value)| value.contains("AKIA"))
            .map(|(name, _)| Finding::new(format!("AWS Access Key ID in argument '{name}'")))
            .collect()
    }
}

pub struct Gateway {
    pub addr: SocketAddr,
    pub state: ProxyState,
    pub shutdown: CancellationToken,
}

impl Gateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let proxy = Proxy::new(ProxyConfig {
            public_url: format!("http://{addr}"),
            loopback: LoopbackRewrite::Disabled,
            policy: Arc::new(KeyPrefixPolicy),
            audit: AuditSink::disabled(),
        })
        .unwrap();
        let state = proxy.state().clone();
        let shutdown = CancellationToken::new();
        tokio::spawn(proxy.run(listener, shutdown.clone()));
        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Open a client stream relayed from `upstream`.
    pub async fn connect(&self, upstream: &MockUpstream) -> EventReader {
        let resp = reqwest::get(self.url(&format!("/sse?targetUrl={}", upstream.stream_url())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        EventReader::new(resp)
    }

    pub async fn post_message(&self, session_id: &str, body: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url(&format!("/message?sessionId={session_id}")))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    /// Poll until `id` is (or is no longer) registered.
    pub async fn wait_registered(&self, id: &str, registered: bool) {
        tokio::time::timeout(STEP, async {
            while self.state.registry().contains(id) != registered {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session {id} registered={registered} never observed"));
    }
}

// ---- Client side ----

/// Reads whole events from a downstream stream.
pub struct EventReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: LineSplitter,
    frame: EventFrame,
}

impl EventReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            body: resp.bytes_stream().boxed(),
            lines: LineSplitter::new(),
            frame: EventFrame::new(),
        }
    }

    /// Next complete event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<String> {
        tokio::time::timeout(STEP, async {
            loop {
                while let Some(line) = self.lines.next_line().unwrap() {
                    if let Some(event) = self.frame.push_line(&line) {
                        return Some(String::from_utf8(event.to_vec()).unwrap());
                    }
                }
                match self.body.next().await {
                    Some(Ok(chunk)) => self.lines.push(&chunk),
                    Some(Err(_)) | None => return None,
                }
            }
        })
        .await
        .expect("timed out waiting for an event")
    }

    /// Lines received after the last complete event.
    pub fn partial(&mut self) -> Option<String> {
        if let Some(rest) = self.lines.take_remainder() {
            self.frame.push_line(&rest);
        }
        self.frame
            .take_partial()
            .map(|bytes| String::from_utf8(bytes.to_vec()).unwrap())
    }
}

/// JSON payload of a `data:` line.
pub fn event_json(event: &str) -> serde_json::Value {
    let data = event
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("event has a data line");
    serde_json::from_str(data).unwrap()
}

pub const ENDPOINT_EVENT: &str = "event: endpoint\ndata: /message?sessionId=abc123\n\n";
