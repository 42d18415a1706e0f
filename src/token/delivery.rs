//! Token Delivery Client
//!
//! Hands a mutation token to the SPUs named in a [`TokenResponse`].
//!
//! Delivery runs in two phases:
//!
//! 1. Every mandatory target must accept the token. Each one is tried on its
//!    control port first, then on its data ports in order. A mandatory
//!    target that accepts nowhere aborts the delivery on the spot.
//! 2. The best-effort pool (control addresses, then data addresses) is tried
//!    in order and the first acceptance wins.
//!
//! An endpoint that refused the token is not tried again during the same
//! delivery. One that accepted it may still be asked again by the pool.

use super::http::HttpTokenTransport;
use super::response::{DeliveryOutcome, MandatoryTarget, TokenResponse};
use crate::domain::ports::TokenTransport;
use crate::error::{Error, Result};
use crate::stats::DeliveryStats;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for token delivery
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// URL scheme used to reach SPUs
    pub scheme: String,
    /// Timeout of a single POST
    pub request_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Delivery Client
// =============================================================================

/// Delivers tokens over a [`TokenTransport`]
pub struct TokenDeliveryClient {
    transport: Arc<dyn TokenTransport>,
    stats: Arc<DeliveryStats>,
}

impl TokenDeliveryClient {
    pub fn new(transport: Arc<dyn TokenTransport>) -> Self {
        Self {
            transport,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Create a client that posts over HTTPS
    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTokenTransport::new(config)?)))
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        self.stats.clone()
    }

    /// Deliver the token of `response` to its SPUs
    pub async fn deliver(&self, response: &TokenResponse) -> Result<DeliveryOutcome> {
        let mandatory = response.mandatory_targets();
        if !mandatory.is_empty() {
            info!("Delivering token to {} mandatory SPUs", mandatory.len());
        }

        // Endpoints that refused the token during this delivery
        let mut refused = HashSet::new();

        for target in mandatory {
            if let Err(reasons) = self
                .deliver_mandatory(&response.token, target, &mut refused)
                .await
            {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(Error::TokenDelivery(format!(
                    "unable to deliver to mandatory targets ({})",
                    reasons.join("; ")
                )));
            }
        }

        let pool = response.best_effort_pool();
        let mut reasons = Vec::with_capacity(pool.len());

        for endpoint in pool {
            if refused.contains(endpoint) {
                debug!("Skipping {}, it already refused the token", endpoint);
                continue;
            }

            match self.attempt(endpoint, &response.token).await {
                Ok(outcome) => {
                    let counter = match &outcome {
                        DeliveryOutcome::Acknowledged => &self.stats.acknowledged,
                        DeliveryOutcome::Payload(_) => &self.stats.payloads,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    info!("Token delivered to {}", endpoint);
                    return Ok(outcome);
                }
                Err(reason) => {
                    refused.insert(endpoint);
                    reasons.push(reason);
                }
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(Error::TokenDelivery(format!(
            "unable to deliver to any target ({})",
            reasons.join("; ")
        )))
    }

    /// Try one mandatory target until one of its endpoints accepts
    async fn deliver_mandatory<'a>(
        &self,
        token: &str,
        target: &'a MandatoryTarget,
        refused: &mut HashSet<&'a str>,
    ) -> std::result::Result<(), Vec<String>> {
        let mut reasons = Vec::new();

        for endpoint in target.endpoints() {
            if refused.contains(endpoint) {
                reasons.push(format!("{}: refused earlier", endpoint));
                continue;
            }

            match self.attempt(endpoint, token).await {
                Ok(_) => {
                    debug!("Mandatory SPU {} accepted token", target.control_endpoint);
                    return Ok(());
                }
                Err(reason) => {
                    refused.insert(endpoint);
                    reasons.push(reason);
                }
            }
        }

        Err(reasons)
    }

    /// One POST; failures are reduced to a diagnostic string
    async fn attempt(
        &self,
        endpoint: &str,
        token: &str,
    ) -> std::result::Result<DeliveryOutcome, String> {
        let result = self.transport.post_token(endpoint, token).await;
        self.stats.record_attempt(result.is_ok());

        result.map_err(|e| {
            warn!("Failed to deliver token to {}: {}", endpoint, e);
            format!("{}: {}", endpoint, e)
        })
    }
}
