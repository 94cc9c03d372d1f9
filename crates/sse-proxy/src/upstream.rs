//! HTTP clients for talking to upstream servers, and the header rules for
//! what crosses the gateway.

use std::time::Duration;

use http::header::{self, HeaderMap, HeaderName};

/// Upper bound on dialing an upstream for a discrete request.
const MESSAGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection-scoped headers that never cross the gateway in either
/// direction.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::ACCEPT_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Clients shared by all sessions.
#[derive(Debug, Clone)]
pub struct UpstreamClients {
    /// Long-lived stream requests: no overall timeout, idle connections
    /// kept, bodies passed through without decompression.
    pub stream: reqwest::Client,
    /// Discrete request forwarding.
    pub message: reqwest::Client,
}

impl UpstreamClients {
    pub fn new() -> Result<Self, reqwest::Error> {
        let stream = reqwest::Client::builder()
            .pool_idle_timeout(None)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;

        let message = reqwest::Client::builder()
            .connect_timeout(MESSAGE_CONNECT_TIMEOUT)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;

        Ok(Self { stream, message })
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive" || name.as_str() == "proxy-connection"
}

/// Copy of `headers` without the hop-by-hop set.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}
