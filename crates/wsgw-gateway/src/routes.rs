//! HTTP surface: the upgrade endpoint, the push endpoint, and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, WebSocketUpgrade, rejection::BytesRejection},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::id::ConnectionId;

/// Create the Axum router with all endpoints and middleware.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/connect", get(connect))
        .route("/message/{connection_id}", post(push_message))
        .route("/health", get(health_check))
        .with_state(gateway)
        .layer(TraceLayer::new_for_http())
}

/// `GET /connect`: admit, upgrade, and run one client connection.
///
/// Admission is decided by the backend before the protocol switch, so a
/// rejection still has a plain HTTP response to land on. The response
/// blocks for the connection's whole lifetime once upgraded.
async fn connect(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> GatewayResult<Response> {
    let id = ConnectionId::generate();
    gateway.authorize(&id, &headers).await?;

    // The backend now believes this connection exists. If the upgrade
    // itself fails there will never be a session to end, so pair the
    // admission with a disconnect notification here.
    let on_failed = {
        let gateway = Arc::clone(&gateway);
        let id = id.clone();
        move |err: axum::Error| {
            warn!(connection_id = %id, error = %err, "upgrade failed after admission");
            tokio::spawn(async move { gateway.connection_failed(&id).await });
        }
    };

    Ok(ws
        .on_failed_upgrade(on_failed)
        .on_upgrade(move |socket| async move { gateway.run_session(socket, id).await }))
}

/// `POST /message/{connection_id}`: push one message to a live connection.
///
/// The body must be a bare JSON string value. 200 means enqueued, not
/// delivered; delivery is asynchronous and may still fail.
async fn push_message(
    State(gateway): State<Arc<Gateway>>,
    Path(connection_id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> GatewayResult<StatusCode> {
    let body = body.map_err(|err| GatewayError::Io(std::io::Error::other(err.to_string())))?;

    let message = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(serde_json::Value::String(text)) => text,
        _ => return Err(GatewayError::InvalidPushBody),
    };

    gateway
        .push(&ConnectionId::from(connection_id), message)
        .await?;
    Ok(StatusCode::OK)
}

/// `GET /health`: liveness probe.
async fn health_check(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "wsgw",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": gateway.uptime().as_secs(),
        "connections": gateway.connection_count().await,
    }))
}
