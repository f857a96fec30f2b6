//! HTTP destination sender
//!
//! Posts `{"text": ...}` to a chat endpoint, authenticating with the
//! destination token as a bearer credential.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::DestinationSender;
use crate::error::{ConfigError, DeliveryError, Result};

/// Longest response body quoted back in an error
const MAX_ERROR_BODY: usize = 200;

#[derive(Clone)]
pub struct HttpSender {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSender {
    /// Create a sender for `endpoint` with a per-request `timeout`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint is not an http(s) URL or
    /// the client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "destination.endpoint".to_string(),
                reason: format!("'{}' is not an http(s) URL", endpoint),
            }
            .into());
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("relaycast/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "destination".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DestinationSender for HttpSender {
    async fn send(&self, token: &SecretString, text: &str) -> std::result::Result<(), DeliveryError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token.expose_secret())
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Network(format!("request timed out: {}", e))
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "destination accepted message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Map a non-success response to a delivery error
///
/// Timeouts (408), throttling (429) and server errors count as network
/// failures; every other client error is a rejection.
pub fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let body = body.trim();
    let detail = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("HTTP {}: {}", status.as_u16(), snippet)
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        DeliveryError::Network(detail)
    } else {
        DeliveryError::Rejected(detail)
    }
}
