//! Gateway configuration.

/// Configuration for one gateway instance.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Interface the gateway listens on.
    pub host: String,
    /// Listen port. Port 0 asks the OS for an ephemeral port; the resolved
    /// address is reported by [`crate::Server::local_addr`].
    pub port: u16,
    /// Base URL of the backend application receiving lifecycle callbacks
    /// and message-received calls, e.g. `http://127.0.0.1:3000`.
    pub app_base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            app_base_url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr() {
        let config = GatewayConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }
}
