//! nPod Mutation Completion
//!
//! Client side of the asynchronous mutation protocol used by the nPod
//! control plane. Mutations against on-premises SPUs are never executed by
//! the control plane itself: it hands back a one-time token, the client
//! relays that token to reachable SPUs, and the SPUs run the work as
//! recipes whose progress the client polls until they finish.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         MutationCompletion                           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐   ┌─────────────────────┐   ┌─────────────────┐  │
//! │  │ Issue          │──►│ Token Delivery      │──►│ Recipe Poller   │  │
//! │  │ Validator      │   │ Client              │   │ (one / many)    │  │
//! │  └────────────────┘   └──────────┬──────────┘   └────────┬────────┘  │
//! │                                  │                       │           │
//! ├──────────────────────────────────┼───────────────────────┼───────────┤
//! │                         Ports    │                       │           │
//! │                   ┌──────────────┴──────┐   ┌────────────┴────────┐  │
//! │                   │  TokenTransport     │   │  RecipeSource       │  │
//! │                   │  (HTTPS to SPUs)    │   │  (getNPodRecipes)   │  │
//! │                   └─────────────────────┘   └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`issues`]: Pre-flight issue validation
//! - [`token`]: Token responses and their delivery to SPUs
//! - [`recipe`]: Recipe records, the recipe query and the poller
//! - [`mutation`]: End to end completion of a mutation
//! - [`domain`]: Ports to the control plane and the SPUs
//! - [`stats`]: Delivery and polling counters
//! - [`error`]: Error types and handling

pub mod domain;
pub mod error;
pub mod issues;
pub mod mutation;
pub mod recipe;
pub mod stats;
pub mod token;

// Re-export commonly used types
pub use domain::ports::{ControlPlaneTransport, OperationParam, RecipeSource, TokenTransport};

pub use error::{Error, Result};

pub use issues::{Issue, Issues};

pub use mutation::{CompletionConfig, MutationCompletion};

pub use recipe::{
    GraphQlRecipeSource, MutationResult, PendingWaitTarget, PollerConfig, RecipeFilter,
    RecipePoller, RecipeRecord, RecipeRecordList, RecipeState, RecipeType,
};

pub use stats::{DeliveryStats, DeliveryStatsSnapshot, PollStats, PollStatsSnapshot};

pub use token::{
    DeliveryConfig, DeliveryOutcome, HttpTokenTransport, MandatoryTarget, PodTokenResponse,
    TokenDeliveryClient, TokenResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
