use std::net::SocketAddr;
use std::sync::Arc;

use audit_log::{AuditSink, AuditSource};
use axum::extract::{ConnectInfo, Request};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::interceptor;
use crate::policy::ContentPolicy;
use crate::registry::SessionRegistry;
use crate::relay;
use crate::target::LoopbackRewrite;
use crate::upstream::UpstreamClients;

/// Component name recorded in audit entries.
pub(crate) const COMPONENT: &str = "sse-proxy";

/// Configuration for the gateway.
pub struct ProxyConfig {
    /// Base URL clients use to reach the gateway, e.g.
    /// `http://localhost:11435`. Rewritten endpoint events point here.
    pub public_url: String,
    /// Loopback substitution applied to target URLs.
    pub loopback: LoopbackRewrite,
    /// Policy every `tools/call` request is checked against.
    pub policy: Arc<dyn ContentPolicy>,
    pub audit: AuditSink,
}

/// Shared handler state.
#[derive(Clone)]
pub struct ProxyState {
    pub(crate) config: Arc<ProxyConfig>,
    pub(crate) registry: SessionRegistry,
    pub(crate) clients: UpstreamClients,
    /// Cancelled on shutdown; ends every open stream.
    pub(crate) shutdown: CancellationToken,
}

impl ProxyState {
    pub fn new(config: ProxyConfig, registry: SessionRegistry) -> Result<Self, reqwest::Error> {
        Ok(Self {
            config: Arc::new(config),
            registry,
            clients: UpstreamClients::new()?,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Stop every open stream relay.
    pub fn close_streams(&self) {
        self.shutdown.cancel();
    }
}

/// Routes:
///
/// - `GET /sse?targetUrl=...` opens a relayed stream.
/// - `GET /?targetUrl=...` is the same, for URLs written by the config
///   rewriter.
/// - `POST /message?sessionId=...` inspects and forwards a discrete request.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", get(relay::open_stream))
        .route("/sse", get(relay::open_stream))
        .route("/message", post(interceptor::handle_message))
        .with_state(state)
}

/// The gateway server.
pub struct Proxy {
    state: ProxyState,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            state: ProxyState::new(config, SessionRegistry::new())?,
        })
    }

    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Serve on `listener` until `shutdown` is cancelled.
    ///
    /// Open streams are ended as soon as shutdown begins so that in-flight
    /// connections can drain.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, public_url = %self.state.config.public_url, "gateway listening");

        let state = self.state.clone();
        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!(open_sessions = state.registry.len(), "gateway shutting down");
            state.close_streams();
        })
        .await
    }
}

/// Peer address, when the server was started with connect info.
pub(crate) fn remote_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Audit source for a gateway event.
pub(crate) fn make_source(
    session_id: Option<&str>,
    upstream: Option<&str>,
    remote_addr: Option<SocketAddr>,
) -> AuditSource {
    let mut source = AuditSource::new(COMPONENT);
    if let Some(id) = session_id {
        source = source.with_session(id);
    }
    if let Some(upstream) = upstream {
        source = source.with_upstream(upstream);
    }
    if let Some(addr) = remote_addr {
        source = source.with_remote_addr(addr.to_string());
    }
    source
}
