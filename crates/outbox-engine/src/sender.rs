//! Provider delivery contract and the HTTP gateway implementation.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::OutboxResult;

/// A classified delivery failure.
///
/// The outcome policy dispatches on these variants exhaustively, so every
/// failure a sender can produce must map to exactly one of them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// Provider signalled a rate limit (HTTP 429), with an optional
    /// Retry-After hint in seconds.
    #[error("rate limited (retry after {retry_after_seconds:?}s)")]
    RateLimited { retry_after_seconds: Option<i64> },

    /// Provider-side failure (HTTP 5xx).
    #[error("HTTP {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Request rejected by the provider (HTTP 4xx other than 429).
    #[error("HTTP {status}: {message}")]
    ClientError { status: u16, message: String },

    /// The request never produced an HTTP status (DNS, connect, timeout).
    #[error("network error: {message}")]
    Network { message: String },
}

impl SendError {
    /// Whether the failure is infra-class (provider fault or unreachable)
    /// rather than a permanent rejection of the payload.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::ServerError { .. } | Self::Network { .. })
    }

    /// The HTTP status behind the failure, where one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ServerError { status, .. } | Self::ClientError { status, .. } => Some(*status),
            Self::Network { .. } => None,
        }
    }
}

/// Pluggable delivery capability the dispatch cycle runs against.
#[async_trait::async_trait]
pub trait ProviderSender: Send + Sync {
    /// Deliver one payload to the provider behind `integration_id`.
    ///
    /// Implementations must enforce their own timeout and surface it as a
    /// [`SendError::Network`] failure; the dispatcher never waits beyond the
    /// sender's return.
    async fn send(
        &self,
        integration_id: &str,
        operation: &str,
        payload: &str,
    ) -> Result<Value, SendError>;
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Base URL for the delivery gateway API.
    pub api_base_url: String,
    /// Bearer token attached to every request, if configured.
    pub api_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            api_base_url: outbox_core::DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            timeout_secs: outbox_core::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// HTTP sender delivering payloads through the gateway API.
pub struct HttpSender {
    config: SenderConfig,
    client: Client,
}

impl HttpSender {
    /// Create a new HTTP sender.
    pub fn new(config: SenderConfig) -> OutboxResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, integration_id: &str, operation: &str) -> String {
        format!(
            "{}/integrations/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            integration_id,
            operation
        )
    }
}

#[async_trait::async_trait]
impl ProviderSender for HttpSender {
    async fn send(
        &self,
        integration_id: &str,
        operation: &str,
        payload: &str,
    ) -> Result<Value, SendError> {
        let url = self.endpoint(integration_id, operation);

        debug!(url = %url, integration = integration_id, operation, "Delivering payload");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(payload.to_string());

        if let Some(token) = &self.config.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| SendError::Network {
            message: e.to_string(),
        })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_seconds = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok());
            return Err(SendError::RateLimited {
                retry_after_seconds,
            });
        }

        if status.is_success() {
            // Providers are not obliged to answer with JSON; wrap anything
            // else so the stored response is always a JSON document.
            let text = response.text().await.map_err(|e| SendError::Network {
                message: e.to_string(),
            })?;
            let value = serde_json::from_str(&text)
                .unwrap_or_else(|_| serde_json::json!({ "raw": text }));
            return Ok(value);
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(SendError::ServerError {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(SendError::ClientError {
                status: status.as_u16(),
                message,
            })
        }
    }
}
