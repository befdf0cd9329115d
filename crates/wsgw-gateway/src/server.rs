//! HTTP server assembly and lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::gateway::Gateway;
use crate::routes;

/// A bound, not-yet-serving gateway server.
///
/// Binding is split from serving so callers can learn the listen address
/// first, which is what lets tests bind port 0.
pub struct Server {
    gateway: Arc<Gateway>,
    listener: TcpListener,
}

impl Server {
    /// Bind the configured address and construct the gateway behind it.
    pub async fn bind(config: &GatewayConfig) -> GatewayResult<Self> {
        let gateway = Arc::new(Gateway::new(config)?);
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self { gateway, listener })
    }

    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then cancel every live session and
    /// drain.
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(%addr, "gateway listening");

        let gateway = Arc::clone(&self.gateway);
        let app = routes::router(self.gateway);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                // Open WebSocket connections block the drain until their
                // sessions observe cancellation and return.
                gateway.shutdown();
            })
            .await?;

        info!("gateway stopped");
        Ok(())
    }
}
