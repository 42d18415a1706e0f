//! HTTP Token Transport
//!
//! Delivers a token to one SPU endpoint with a single POST whose body is the
//! raw token.

use super::delivery::DeliveryConfig;
use super::response::DeliveryOutcome;
use crate::domain::ports::TokenTransport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// reqwest-backed [`TokenTransport`]
#[derive(Debug, Clone)]
pub struct HttpTokenTransport {
    client: reqwest::Client,
    scheme: String,
}

impl HttpTokenTransport {
    /// Create a transport honoring the per-attempt timeout of `config`
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
        })
    }

    /// URL a token is posted to; SPUs listen on the root path
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}://{}/", self.scheme, endpoint)
    }
}

#[async_trait]
impl TokenTransport for HttpTokenTransport {
    async fn post_token(&self, endpoint: &str, token: &str) -> Result<DeliveryOutcome> {
        let url = self.endpoint_url(endpoint);
        debug!("Posting token to {}", url);

        let response = self
            .client
            .post(&url)
            .body(token.to_owned())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::TokenDelivery("request timed out".into())
                } else {
                    Error::TokenDelivery(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::TokenDelivery(format!("failed to read response: {}", e)))?;

        classify_response(status, &body)
    }
}

/// Interpret the SPU's answer to a token POST
///
/// A 2xx answer of `OK` (bare or JSON-quoted) is a plain acknowledgement;
/// any other 2xx answer must be JSON and becomes the outcome payload.
pub fn classify_response(status: StatusCode, body: &str) -> Result<DeliveryOutcome> {
    if !status.is_success() {
        return Err(Error::TokenDelivery(format!(
            "status {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }

    let trimmed = body.trim();
    if trimmed == "OK" || trimmed == "\"OK\"" {
        return Ok(DeliveryOutcome::Acknowledged);
    }

    serde_json::from_str(trimmed)
        .map(DeliveryOutcome::Payload)
        .map_err(|e| Error::TokenDelivery(format!("unexpected response body: {}", e)))
}
