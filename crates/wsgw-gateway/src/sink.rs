//! Delivery of client-originated messages to the backend.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{GatewayError, GatewayResult};
use crate::id::ConnectionId;
use crate::notifier::{CONNECTION_ID_HEADER, endpoint};

/// Receiver of messages arriving on client sockets.
///
/// One implementation exists in production, [`HttpMessageSink`]; the trait
/// seam is what lets session behavior be exercised against an in-process
/// recorder instead of a live backend.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Handle one text message from the identified connection.
    async fn on_message(&self, message: &str, id: &ConnectionId) -> GatewayResult<()>;
}

/// Relays each message to `POST {base}/ws/message-received`, identifying
/// the originating connection through the id header.
#[derive(Debug, Clone)]
pub struct HttpMessageSink {
    client: reqwest::Client,
    url: String,
}

impl HttpMessageSink {
    pub(crate) fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, "/ws/message-received"),
        }
    }
}

#[async_trait]
impl MessageSink for HttpMessageSink {
    async fn on_message(&self, message: &str, id: &ConnectionId) -> GatewayResult<()> {
        let response = self
            .client
            .post(&self.url)
            .header(CONNECTION_ID_HEADER, id.header_value())
            .body(message.to_string())
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamFailure(err.to_string()))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(GatewayError::UpstreamFailure(format!(
                "message-received returned {}",
                response.status()
            )))
        }
    }
}
