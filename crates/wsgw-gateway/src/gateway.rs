//! Gateway core: wires the registry, rate limiter, and backend clients
//! together and owns the per-connection workflow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocket;
use axum::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::id::ConnectionId;
use crate::limiter::PushLimiter;
use crate::notifier::{BACKEND_TIMEOUT, LifecycleNotifier};
use crate::registry::ConnectionRegistry;
use crate::session;
use crate::sink::{HttpMessageSink, MessageSink};

/// Shared gateway state behind every route handler.
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    limiter: PushLimiter,
    notifier: LifecycleNotifier,
    sink: Arc<dyn MessageSink>,
    shutdown: CancellationToken,
    started: Instant,
}

impl Gateway {
    /// Build a gateway talking to the backend named in `config`.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .map_err(|err| GatewayError::UpstreamFailure(err.to_string()))?;

        Ok(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            limiter: PushLimiter::new(),
            notifier: LifecycleNotifier::new(client.clone(), &config.app_base_url),
            sink: Arc::new(HttpMessageSink::new(client, &config.app_base_url)),
            shutdown: CancellationToken::new(),
            started: Instant::now(),
        })
    }

    /// Number of currently live connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Time since this gateway was constructed.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Deliver a backend-originated message to the addressed connection.
    ///
    /// Waits on the shared token bucket first, so a burst of pushes spreads
    /// out instead of failing. The identifier is only resolved after the
    /// wait; a connection that disappeared meanwhile reports
    /// [`GatewayError::ConnectionNotFound`].
    pub async fn push(&self, id: &ConnectionId, message: String) -> GatewayResult<()> {
        self.limiter.acquire().await;
        self.registry.send_to(id, message).await
    }

    /// Ask the backend whether this connection may be admitted. Runs before
    /// the protocol upgrade so a rejection still has an HTTP response to
    /// land on.
    pub(crate) async fn authorize(
        &self,
        id: &ConnectionId,
        client_headers: &HeaderMap,
    ) -> GatewayResult<()> {
        self.notifier.connecting(id, client_headers).await
    }

    /// Report a connection the backend admitted but that never produced a
    /// session, so the backend does not track it forever.
    pub(crate) async fn connection_failed(&self, id: &ConnectionId) {
        self.notifier.disconnected(id).await;
    }

    /// Drive one upgraded socket to completion, then notify the backend.
    pub(crate) async fn run_session(&self, socket: WebSocket, id: ConnectionId) {
        info!(connection_id = %id, "session started");

        let result = session::run(
            socket,
            id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
            self.shutdown.clone(),
        )
        .await;

        match result {
            Ok(()) => info!(connection_id = %id, "session ended"),
            Err(GatewayError::Cancelled) => info!(connection_id = %id, "session cancelled"),
            Err(err) => warn!(connection_id = %id, error = %err, "session ended with error"),
        }

        self.notifier.disconnected(&id).await;
    }

    /// Cancel every live session. Used on graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
