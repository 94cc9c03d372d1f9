use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

use crate::target::TargetError;

/// Failures answered on the downstream request.
///
/// Policy blocks are not errors: they are delivered on the session's stream
/// and the request itself is accepted.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing targetUrl query parameter")]
    MissingTarget,

    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("missing sessionId parameter")]
    MissingSessionId,

    #[error("session not found")]
    SessionNotFound,

    #[error("error reading request body: {0}")]
    ReadRequest(axum::Error),

    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("error forwarding request: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("error reading upstream response: {0}")]
    ReadBody(reqwest::Error),

    #[error("streaming unavailable: {0}")]
    StreamUnavailable(String),
}

impl From<TargetError> for GatewayError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::Missing => Self::MissingTarget,
            invalid @ TargetError::Invalid { .. } => Self::InvalidTarget(invalid.to_string()),
        }
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingTarget
            | Self::InvalidTarget(_)
            | Self::MissingSessionId
            | Self::ReadRequest(_)
            | Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::ReadBody(_) | Self::StreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}
