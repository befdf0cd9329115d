//! Gateway error taxonomy and HTTP status mapping.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Gateway handler result.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors produced by the gateway core.
///
/// Per-connection failures never affect other connections; lifecycle
/// notification failures during teardown are logged and swallowed. There is
/// no retry anywhere in this crate — the design relies on timeouts and
/// forced eviction instead.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A push addressed an identifier with no live session.
    #[error("connection not found")]
    ConnectionNotFound,

    /// The backend rejected a connecting attempt.
    #[error("backend rejected the connection")]
    Unauthorized,

    /// The backend was unreachable or answered a lifecycle call with an
    /// unexpected status.
    #[error("backend lifecycle call failed: {0}")]
    UpstreamFailure(String),

    /// Read or write failure on the client socket.
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),

    /// An outbound write did not complete within the per-write deadline.
    #[error("write to client timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The push body was not a bare JSON string value.
    #[error("push body must be a JSON-encoded string")]
    InvalidPushBody,

    /// Context expiry or shutdown terminated the session.
    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::ConnectionNotFound => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidPushBody => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamFailure(_)
            | GatewayError::Transport(_)
            | GatewayError::WriteTimeout(_)
            | GatewayError::Cancelled
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Rejections carry an empty body; the reason stays in the logs.
        self.status().into_response()
    }
}
