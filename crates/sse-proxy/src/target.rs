//! Upstream target resolution.
//!
//! Clients name the upstream in the `targetUrl` query parameter. Config
//! files written by the rewriter append the upstream URL without encoding
//! it, so the value may itself contain `&` and `=`; other clients send it
//! percent-encoded. Both shapes are accepted.

use thiserror::Error;
use url::form_urlencoded;
use url::{Host, Url};

/// Query key naming the upstream stream URL.
pub const TARGET_PARAM: &str = "targetUrl";

/// Query key carrying the session identifier.
pub const SESSION_PARAM: &str = "sessionId";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("missing targetUrl query parameter")]
    Missing,
    #[error("invalid target URL '{target}': {reason}")]
    Invalid { target: String, reason: String },
}

impl TargetError {
    fn invalid(target: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Substitution applied to loopback upstream hosts.
///
/// When the gateway runs in an isolated network namespace (a container),
/// `localhost` in a target URL names the gateway itself rather than the
/// machine the client runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoopbackRewrite {
    #[default]
    Disabled,
    /// Replace loopback hosts with this host name.
    Alias(String),
}

/// Upstream URL named by a raw downstream query string, if any.
pub fn extract_target_url(raw_query: &str) -> Option<String> {
    let needle = format!("{TARGET_PARAM}=");

    // Un-encoded: everything after the first `targetUrl=` that starts a
    // query component.
    let unencoded = raw_query
        .match_indices(&needle)
        .find(|(pos, _)| *pos == 0 || raw_query.as_bytes()[pos - 1] == b'&')
        .map(|(pos, _)| &raw_query[pos + needle.len()..]);
    if let Some(rest) = unencoded {
        if rest.contains("://") {
            return Some(rest.to_string());
        }
    }

    // Decoded components: the value of a `targetUrl` key, or whatever
    // follows `targetUrl=` inside a key or value.
    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        if key == TARGET_PARAM && !value.is_empty() {
            return Some(value.into_owned());
        }
        for component in [&key, &value] {
            if let Some(pos) = component.find(&needle) {
                let rest = &component[pos + needle.len()..];
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
        }
    }

    None
}

/// Parse `target` and apply the loopback substitution.
pub fn resolve_upstream(target: &str, loopback: &LoopbackRewrite) -> Result<Url, TargetError> {
    let mut url = Url::parse(target.trim()).map_err(|e| TargetError::invalid(target, e))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(TargetError::invalid(target, "scheme must be http or https"));
    }
    if url.host().is_none() {
        return Err(TargetError::invalid(target, "no host"));
    }

    if let LoopbackRewrite::Alias(alias) = loopback {
        if is_loopback(&url) {
            url.set_host(Some(alias.as_str()))
                .map_err(|e| TargetError::invalid(target, e))?;
        }
    }

    Ok(url)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// `scheme://host[:port]` of `url`.
pub fn upstream_origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// URL of the upstream stream request: the resolved target with its query
/// replaced by the downstream query, verbatim.
pub fn stream_request_url(resolved: &Url, raw_query: &str) -> Url {
    let mut url = resolved.clone();
    url.set_query(if raw_query.is_empty() {
        None
    } else {
        Some(raw_query)
    });
    url
}

/// Session id carried by the endpoint URL the upstream advertised, which may
/// be absolute or relative to the stream URL.
pub fn advertised_session_id(
    stream_url: &Url,
    advertised: &str,
) -> Result<Option<String>, TargetError> {
    let endpoint = stream_url
        .join(advertised.trim())
        .map_err(|e| TargetError::invalid(advertised, e))?;

    Ok(endpoint
        .query_pairs()
        .find(|(key, _)| key == SESSION_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty()))
}

/// Where discrete requests for `session_id` go on the upstream at `origin`.
pub fn upstream_message_url(origin: &str, session_id: &str) -> String {
    message_url(origin, session_id)
}

/// The gateway's own discrete-request endpoint for `session_id`.
pub fn gateway_endpoint(public_url: &str, session_id: Option<&str>) -> String {
    message_url(public_url, session_id.unwrap_or_default())
}

fn message_url(base: &str, session_id: &str) -> String {
    let base = base.trim_end_matches('/');
    let id: String = form_urlencoded::byte_serialize(session_id.as_bytes()).collect();
    format!("{base}/message?{SESSION_PARAM}={id}")
}
