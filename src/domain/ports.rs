//! Domain Ports - Collaborator boundaries of the mutation client
//!
//! The completion protocol depends on two external systems: the control
//! plane API (reached through a GraphQL executor owned by the caller) and
//! the SPUs on the customer's premises (reached over HTTPS). These traits
//! define those boundaries so the protocol can be driven by fakes in tests.

use crate::error::Result;
use crate::recipe::{RecipeFilter, RecipeRecordList};
use crate::token::DeliveryOutcome;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Control Plane Transport Port
// =============================================================================

/// A typed parameter of a remote operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationParam {
    /// The value, already encoded as JSON
    pub value: Value,
    /// The schema type name of the parameter (e.g. `NPodRecipeFilter`)
    pub type_name: String,
    /// Whether the schema marks the parameter as non-null
    pub required: bool,
}

impl OperationParam {
    pub fn new(value: Value, type_name: impl Into<String>, required: bool) -> Self {
        Self {
            value,
            type_name: type_name.into(),
            required,
        }
    }
}

/// Executes named read operations against the control plane
///
/// Session handling and the wire protocol live behind this trait. The
/// returned value is the decoded payload of the named operation, without
/// any protocol envelope.
#[async_trait]
pub trait ControlPlaneTransport: Send + Sync {
    async fn query(
        &self,
        name: &str,
        params: BTreeMap<String, OperationParam>,
        fields: &[String],
    ) -> Result<Value>;
}

// =============================================================================
// Recipe Source Port
// =============================================================================

/// Looks up recipe records
#[async_trait]
pub trait RecipeSource: Send + Sync {
    async fn get_recipes(&self, filter: &RecipeFilter) -> Result<RecipeRecordList>;
}

// =============================================================================
// Token Transport Port
// =============================================================================

/// Performs a single token delivery attempt against one SPU endpoint
///
/// An `Err` is a soft failure for that endpoint only; the delivery client
/// decides whether another candidate is tried.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    async fn post_token(&self, endpoint: &str, token: &str) -> Result<DeliveryOutcome>;
}
