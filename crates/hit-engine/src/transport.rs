//! HTTP transport for hit delivery.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Response headers surfaced to the host through the response sink.
const HEADERS_OF_INTEREST: [&str; 2] = ["etag", "server"];

/// Transport-level failure.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request failed inside reqwest.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint unreachable (timeout or connection failure).
    #[error("Connection failed: {0}")]
    Connection(String),
}

impl TransportError {
    /// Recoverable failures are retried at the fixed interval; anything else
    /// drops the hit.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Connection(_) => true,
            TransportError::Http(e) => e.is_timeout() || e.is_connect(),
        }
    }
}

/// A completed HTTP exchange. Status classification is the delivery
/// processor's job, not the transport's.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    /// Subset of response headers the host cares about.
    pub headers: HashMap<String, String>,
}

/// Asynchronous POST of an opaque hit payload to the collection endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, body: &str) -> Result<TransportResponse, TransportError>;
}

/// Production transport over a shared reqwest client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, body: &str) -> Result<TransportResponse, TransportError> {
        debug!(url = %url, bytes = body.len(), "Sending hit");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    TransportError::Connection(e.to_string())
                } else {
                    TransportError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for name in HEADERS_OF_INTEREST {
            if let Some(value) = response.headers().get(name).and_then(|v| v.to_str().ok()) {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        let body = response.text().await.unwrap_or_default();

        Ok(TransportResponse {
            status,
            body,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_recoverable() {
        let err = TransportError::Connection("refused".to_string());
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_classified_recoverable() {
        // Nothing listens on this port; reqwest fails with a connect error.
        let transport = HttpTransport::new(Duration::from_millis(500));
        let err = transport
            .send("http://127.0.0.1:9/b/ss", "ndh=1")
            .await
            .expect_err("expected connection failure");
        assert!(err.is_recoverable());
    }
}
