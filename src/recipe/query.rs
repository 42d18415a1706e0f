//! Recipe Query
//!
//! Builds the `getNPodRecipes` call and decodes its result.

use super::model::{RecipeFilter, RecipeRecordList};
use crate::domain::ports::{ControlPlaneTransport, OperationParam, RecipeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the remote recipe query
pub const RECIPE_QUERY: &str = "getNPodRecipes";

/// Schema type of the recipe filter parameter
pub const RECIPE_FILTER_TYPE: &str = "NPodRecipeFilter";

/// [`RecipeSource`] backed by the control plane API
pub struct GraphQlRecipeSource {
    transport: Arc<dyn ControlPlaneTransport>,
}

impl GraphQlRecipeSource {
    pub fn new(transport: Arc<dyn ControlPlaneTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl RecipeSource for GraphQlRecipeSource {
    async fn get_recipes(&self, filter: &RecipeFilter) -> Result<RecipeRecordList> {
        let mut params = BTreeMap::new();
        params.insert(
            "filter".to_string(),
            OperationParam::new(serde_json::to_value(filter)?, RECIPE_FILTER_TYPE, false),
        );

        let value = self
            .transport
            .query(RECIPE_QUERY, params, &RecipeRecordList::fields())
            .await?;

        serde_json::from_value(value).map_err(|e| Error::decode("RecipeRecordList", e))
    }
}
