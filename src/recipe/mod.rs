//! Recipe Tracking Module
//!
//! Recipe records, the recipe query, and the poller that waits on them.

pub mod model;
pub mod poller;
pub mod query;

pub use model::*;
pub use poller::{
    MutationResult, PendingWaitTarget, PollerConfig, RecipePoller, POLL_INTERVAL, RECIPE_TIMEOUT,
};
pub use query::GraphQlRecipeSource;
