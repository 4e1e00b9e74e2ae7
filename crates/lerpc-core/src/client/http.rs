//! Request/reply transport over `POST /execute`.

use crate::config::ClientConfig;
use crate::proto::{Request, RpcResult};
use crate::{LerpcError, Result};
use reqwest::header;
use std::time::Duration;
use tracing::debug;

/// One-shot HTTP execution against a single server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(concat!("lerpc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LerpcError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            url: config.execute_url(),
            timeout: config.request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `request` and decode the reply.
    ///
    /// Internal server faults come back as status 500 with an Error result
    /// body; that result is returned as-is. A body that is not a result is a
    /// decode error.
    pub async fn execute(&self, request: &Request) -> Result<RpcResult> {
        let body = serde_json::to_vec(request)?;
        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LerpcError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LerpcError::from_reqwest(e, self.timeout))?;
        debug!("POST {} -> {} ({} bytes)", self.url, status, bytes.len());

        serde_json::from_slice(&bytes).map_err(|e| LerpcError::Json {
            message: format!("Failed to decode result (HTTP {}): {}", status, e),
            source: Some(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_timeout_reports_configured_duration() {
        // Accepts connections but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ClientConfig::new(&addr, "").with_request_timeout(Duration::from_millis(100));
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .execute(&Request::call("base", "ping"))
            .await
            .unwrap_err();

        assert!(matches!(err, LerpcError::Timeout(d) if d == Duration::from_millis(100)));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Request timeout after 100ms");
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let transport = HttpTransport::new(&ClientConfig::new("127.0.0.1:1", "")).unwrap();
        let err = transport
            .execute(&Request::call("base", "ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, LerpcError::Network { .. }));
    }
}
