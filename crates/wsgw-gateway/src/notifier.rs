//! Backend lifecycle notification over HTTP.
//!
//! The backend learns about connection starts and ends through two plain
//! HTTP callbacks, `POST {base}/ws/connecting` and
//! `POST {base}/ws/disconnected`. The connecting call doubles as admission
//! control: anything other than a 200 keeps the upgrade from happening.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, header};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::id::ConnectionId;

/// Header carrying the connection identifier on every backend call.
pub const CONNECTION_ID_HEADER: HeaderName = HeaderName::from_static("x-wsgw-connection-id");

/// Deadline for any single backend HTTP call.
pub(crate) const BACKEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the backend's connection lifecycle endpoints.
#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    client: reqwest::Client,
    connecting_url: String,
    disconnected_url: String,
}

impl LifecycleNotifier {
    pub(crate) fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            connecting_url: endpoint(base_url, "/ws/connecting"),
            disconnected_url: endpoint(base_url, "/ws/disconnected"),
        }
    }

    /// Ask the backend to admit a new connection.
    ///
    /// The client's handshake headers are forwarded so the backend can run
    /// its own authentication; a 401 answer surfaces as
    /// [`GatewayError::Unauthorized`], any other non-200 answer or a failed
    /// call as [`GatewayError::UpstreamFailure`].
    pub(crate) async fn connecting(
        &self,
        id: &ConnectionId,
        client_headers: &HeaderMap,
    ) -> GatewayResult<()> {
        let mut headers = forwardable_headers(client_headers);
        headers.insert(CONNECTION_ID_HEADER, id.header_value());

        let response = self
            .client
            .post(&self.connecting_url)
            .headers(headers)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamFailure(err.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                debug!(connection_id = %id, "backend admitted connection");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(GatewayError::Unauthorized),
            status => Err(GatewayError::UpstreamFailure(format!(
                "connecting returned {status}"
            ))),
        }
    }

    /// Tell the backend a connection has ended. Best-effort: there is no
    /// session left to take action on a failure, so it only gets logged.
    pub(crate) async fn disconnected(&self, id: &ConnectionId) {
        let result = self
            .client
            .post(&self.disconnected_url)
            .header(CONNECTION_ID_HEADER, id.header_value())
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!(connection_id = %id, "backend notified of disconnect");
            }
            Ok(response) => {
                warn!(
                    connection_id = %id,
                    status = %response.status(),
                    "disconnected notification rejected"
                );
            }
            Err(err) => {
                warn!(connection_id = %id, error = %err, "disconnected notification failed");
            }
        }
    }
}

/// Build a backend endpoint URL from the configured base.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

/// Copy the client's request headers, dropping the ones that describe the
/// inbound hop rather than the client: the WebSocket handshake fields and
/// the connection-level framing headers reqwest sets itself.
fn forwardable_headers(client_headers: &HeaderMap) -> HeaderMap {
    const SKIPPED: [HeaderName; 9] = [
        header::HOST,
        header::CONNECTION,
        header::UPGRADE,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        header::SEC_WEBSOCKET_KEY,
        header::SEC_WEBSOCKET_VERSION,
        header::SEC_WEBSOCKET_EXTENSIONS,
        header::SEC_WEBSOCKET_PROTOCOL,
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in client_headers {
        if !SKIPPED.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_endpoint_building() {
        assert_eq!(
            endpoint("http://localhost:3000", "/ws/connecting"),
            "http://localhost:3000/ws/connecting"
        );
        assert_eq!(
            endpoint("http://localhost:3000/", "/ws/disconnected"),
            "http://localhost:3000/ws/disconnected"
        );
        assert_eq!(
            endpoint("http://app.internal/api/", "/ws/message-received"),
            "http://app.internal/api/ws/message-received"
        );
    }

    #[test]
    fn test_handshake_headers_not_forwarded() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("gw.example.com"));
        incoming.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        incoming.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        incoming.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token-123"),
        );
        incoming.insert(header::COOKIE, HeaderValue::from_static("session=abc"));

        let forwarded = forwardable_headers(&incoming);

        assert_eq!(forwarded.len(), 2);
        assert_eq!(
            forwarded.get(header::AUTHORIZATION).unwrap(),
            "Bearer token-123"
        );
        assert_eq!(forwarded.get(header::COOKIE).unwrap(), "session=abc");
    }
}
