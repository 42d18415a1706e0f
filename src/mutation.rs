//! Mutation Completion
//!
//! Drives a mutation on on-premises infrastructure from pre-flight check to
//! finished recipe:
//!
//! ```text
//! issues ──► validate ──► mutation ──► token ──► deliver ──► wait on recipes
//! ```

use crate::domain::ports::RecipeSource;
use crate::error::Result;
use crate::issues::Issues;
use crate::recipe::{PollerConfig, RecipePoller};
use crate::token::{DeliveryConfig, DeliveryOutcome, TokenDeliveryClient, TokenResponse};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Configuration for the whole completion protocol
#[derive(Debug, Clone, Default)]
pub struct CompletionConfig {
    pub delivery: DeliveryConfig,
    pub poller: PollerConfig,
}

/// Completes mutations that require the security triangle
pub struct MutationCompletion {
    delivery: TokenDeliveryClient,
    poller: RecipePoller,
}

impl MutationCompletion {
    pub fn new(delivery: TokenDeliveryClient, poller: RecipePoller) -> Self {
        Self { delivery, poller }
    }

    /// Deliver over HTTPS and look recipes up in `recipes`
    pub fn from_config(config: CompletionConfig, recipes: Arc<dyn RecipeSource>) -> Result<Self> {
        Ok(Self {
            delivery: TokenDeliveryClient::from_config(&config.delivery)?,
            poller: RecipePoller::new(recipes, config.poller),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.poller = self.poller.with_cancellation(cancel);
        self
    }

    pub fn delivery(&self) -> &TokenDeliveryClient {
        &self.delivery
    }

    pub fn poller(&self) -> &RecipePoller {
        &self.poller
    }

    /// Run a mutation end to end
    ///
    /// `issues` are the pre-flight issues predicted for the mutation; they
    /// are checked before `mutate` is invoked, so a mutation that is known
    /// to fail never obtains a token.
    pub async fn run<F, Fut>(
        &self,
        operation: &str,
        issues: Option<&Issues>,
        ignore_warnings: bool,
        mutate: F,
    ) -> Result<DeliveryOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenResponse>>,
    {
        if let Some(issues) = issues {
            issues.validate(ignore_warnings)?;
        }

        let response = mutate().await?;
        self.complete(operation, &response, ignore_warnings).await
    }

    /// Complete a mutation whose token the control plane already issued
    ///
    /// A plain acknowledgement from the SPU means there is no recipe to
    /// track and returns right after delivery.
    pub async fn complete(
        &self,
        operation: &str,
        response: &TokenResponse,
        ignore_warnings: bool,
    ) -> Result<DeliveryOutcome> {
        if let Some(issues) = &response.issues {
            issues.validate(ignore_warnings)?;
        }

        let outcome = self.delivery.deliver(response).await?;

        match outcome.mutation_result()? {
            Some(result) => {
                self.poller
                    .wait_on_mutation_result(&result, operation)
                    .await?;
                info!("{} completed", operation);
            }
            None => info!("{} accepted", operation),
        }

        Ok(outcome)
    }
}
