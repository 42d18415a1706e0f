//! Token Responses
//!
//! Mutations that alter on-premises infrastructure do not execute directly.
//! The control plane answers with a one-time token and the addresses of the
//! SPUs that must receive it; an SPU presented with the token pulls and runs
//! the pending command itself.

use crate::error::{Error, Result};
use crate::issues::Issues;
use crate::recipe::MutationResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Mandatory Target
// =============================================================================

/// An SPU that must acknowledge the token on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandatoryTarget {
    /// Address of the SPU control port, tried first
    #[serde(rename = "controlPortDNS")]
    pub control_endpoint: String,
    /// Addresses of the SPU data ports, tried in order if the control port fails
    #[serde(rename = "dataPortDNS")]
    pub data_endpoints: Vec<String>,
}

impl MandatoryTarget {
    pub fn new<I, S>(control_endpoint: impl Into<String>, data_endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            control_endpoint: control_endpoint.into(),
            data_endpoints: data_endpoints.into_iter().map(Into::into).collect(),
        }
    }

    /// Candidate endpoints in delivery order
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.control_endpoint.as_str())
            .chain(self.data_endpoints.iter().map(String::as_str))
    }
}

// =============================================================================
// Token Response
// =============================================================================

/// Response of a mutation that requires the security triangle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The one-time token to hand to the SPUs
    pub token: String,
    /// Identifier of the resource the mutation is about to create or change
    #[serde(rename = "waitOn")]
    pub wait_on: String,
    /// Control addresses of the SPUs involved, any one of which may accept
    #[serde(rename = "targetIPs")]
    pub target_addresses: Vec<String>,
    /// Data addresses of the SPUs involved, tried after the control addresses
    #[serde(rename = "dataTargetIPs", default)]
    pub data_target_addresses: Option<Vec<String>>,
    /// SPUs that must each accept the token
    #[serde(rename = "mustSendTargetDNS", default)]
    pub mandatory_targets: Option<Vec<MandatoryTarget>>,
    /// Issues predicted for the mutation
    #[serde(default)]
    pub issues: Option<Issues>,
}

impl TokenResponse {
    /// Create a response with only a best-effort pool
    pub fn new<I, S>(token: impl Into<String>, target_addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            token: token.into(),
            wait_on: String::new(),
            target_addresses: target_addresses.into_iter().map(Into::into).collect(),
            data_target_addresses: None,
            mandatory_targets: None,
            issues: None,
        }
    }

    pub fn with_data_targets<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_target_addresses = Some(addresses.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_mandatory_target(mut self, target: MandatoryTarget) -> Self {
        self.mandatory_targets
            .get_or_insert_with(Vec::new)
            .push(target);
        self
    }

    pub fn with_issues(mut self, issues: Issues) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Decode the payload of a mutation
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::decode("TokenResponse", e))
    }

    /// GraphQL selection for a token response
    pub fn fields() -> Vec<String> {
        vec![
            "token".to_string(),
            "waitOn".to_string(),
            "targetIPs".to_string(),
            "dataTargetIPs".to_string(),
            "mustSendTargetDNS{controlPortDNS,dataPortDNS}".to_string(),
            format!("issues{{{}}}", Issues::fields()),
        ]
    }

    pub fn mandatory_targets(&self) -> &[MandatoryTarget] {
        self.mandatory_targets.as_deref().unwrap_or_default()
    }

    /// Best-effort candidates: control addresses, then data addresses
    pub fn best_effort_pool(&self) -> Vec<&str> {
        self.target_addresses
            .iter()
            .chain(self.data_target_addresses.iter().flatten())
            .map(String::as_str)
            .collect()
    }
}

// =============================================================================
// Pod Token Response
// =============================================================================

/// Older envelope that carries the token and the issues side by side
///
/// Still returned by volume creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTokenResponse {
    #[serde(rename = "tokenResp", default)]
    pub token: Option<TokenResponse>,
    #[serde(rename = "IssuesRes", default)]
    pub issues: Option<Issues>,
}

impl PodTokenResponse {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::decode("PodTokenResponse", e))
    }

    pub fn fields() -> Vec<String> {
        vec![
            format!("tokenResp{{{}}}", TokenResponse::fields().join(",")),
            format!("IssuesRes{{{}}}", Issues::fields()),
        ]
    }

    /// Flatten into a single token response
    ///
    /// Envelope issues take the place of any issues inside the token
    /// response. Fails when the envelope carries no token.
    pub fn into_token_response(self) -> Result<TokenResponse> {
        let mut token = self
            .token
            .ok_or_else(|| Error::decode("PodTokenResponse", "tokenResp is missing"))?;
        if self.issues.is_some() {
            token.issues = self.issues;
        }
        Ok(token)
    }
}

// =============================================================================
// Delivery Outcome
// =============================================================================

/// What the SPU answered when it accepted the token
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Plain `OK`; the mutation has nothing to track
    Acknowledged,
    /// JSON describing the recipes started by the mutation
    Payload(Value),
}

impl DeliveryOutcome {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            DeliveryOutcome::Acknowledged => None,
            DeliveryOutcome::Payload(value) => Some(value),
        }
    }

    /// Decode the payload into the identifiers to wait on
    ///
    /// Returns `None` for a plain acknowledgement.
    pub fn mutation_result(&self) -> Result<Option<MutationResult>> {
        match self.payload() {
            None => Ok(None),
            Some(value) => MutationResult::from_value(value.clone()).map(Some),
        }
    }

    /// JSON rendition for display
    pub fn to_json(&self) -> Value {
        match self {
            DeliveryOutcome::Acknowledged => Value::Bool(true),
            DeliveryOutcome::Payload(value) => value.clone(),
        }
    }
}
