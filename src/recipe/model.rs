//! Recipe Records
//!
//! A recipe is the server-side record that tracks the asynchronous execution
//! of a mutation on customer-premises hardware.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Wire format used by the control plane for timestamps
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// =============================================================================
// Recipe State
// =============================================================================

/// Execution state of a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipeState {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelling,
    Cancelled,
}

impl RecipeState {
    /// The recipe will not change state anymore
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecipeState::Completed
                | RecipeState::Failed
                | RecipeState::Timeout
                | RecipeState::Cancelled
        )
    }

    pub fn is_success(self) -> bool {
        self == RecipeState::Completed
    }

    /// Whether the control plane may move a recipe from `self` to `next`
    ///
    /// States only move forward; `Cancelling` may only end in `Cancelled`.
    pub fn can_transition_to(self, next: RecipeState) -> bool {
        use RecipeState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Queued, _) => true,
            (Running, Queued) => false,
            (Running, _) => true,
            (Cancelling, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RecipeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipeState::Queued => write!(f, "Queued"),
            RecipeState::Running => write!(f, "Running"),
            RecipeState::Completed => write!(f, "Completed"),
            RecipeState::Failed => write!(f, "Failed"),
            RecipeState::Timeout => write!(f, "Timeout"),
            RecipeState::Cancelling => write!(f, "Cancelling"),
            RecipeState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

// =============================================================================
// Recipe Type
// =============================================================================

/// Kind of work a recipe performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipeType {
    Claim,
    CreateVolume,
    CreatePod,
    ValidatePod,
    ConfirmPod,
    CreateSnapshot,
    CreateScheduledSnapshot,
    Update,
    AbortUpdate,
    RemoveSnapshotSchedule,
    #[serde(rename = "SendSPUDebugInfo")]
    SendSpuDebugInfo,
    RunTest,
    WipePod,
    DeleteVolume,
    SetVSphereCredentials,
    ResetOrganization,
    #[serde(rename = "PingSPU")]
    PingSpu,
    #[serde(rename = "CreateLUN")]
    CreateLun,
    #[serde(rename = "DeleteLUN")]
    DeleteLun,
    SetProxy,
    #[serde(rename = "SetNTP")]
    SetNtp,
    UpdatePhysicalDrive,
    SetTimezone,
    CloneVolume,
    LocatePhysicalDrive,
    #[serde(rename = "ReplaceSPU")]
    ReplaceSpu,
    #[serde(rename = "SecureEraseSPU")]
    SecureEraseSpu,
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Recipe Record
// =============================================================================

/// Snapshot of a recipe as observed at one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRecord {
    #[serde(rename = "recipeUUID")]
    pub recipe_id: String,
    #[serde(rename = "cancelRecipeUUID")]
    pub cancel_recipe_id: String,
    #[serde(rename = "nPodUUID")]
    pub pod_id: String,
    pub state: RecipeState,
    /// Free text status reported by the coordinating SPU
    pub status: String,
    #[serde(deserialize_with = "lenient_time")]
    pub start: DateTime<Utc>,
    #[serde(rename = "lastUpdate", deserialize_with = "lenient_time")]
    pub last_update: DateTime<Utc>,
    #[serde(rename = "coordinatorSPUSerial")]
    pub coordinator_device_id: String,
    #[serde(rename = "type")]
    pub recipe_type: RecipeType,
}

/// One page of recipes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRecordList {
    /// Pagination cursor, absent on the last page
    #[serde(default)]
    pub cursor: Option<String>,
    pub items: Vec<RecipeRecord>,
}

impl RecipeRecordList {
    /// GraphQL selection for a recipe list
    pub fn fields() -> Vec<String> {
        vec![
            "cursor".to_string(),
            format!(
                "items{{{}}}",
                [
                    "recipeUUID",
                    "cancelRecipeUUID",
                    "nPodUUID",
                    "state",
                    "status",
                    "start",
                    "lastUpdate",
                    "coordinatorSPUSerial",
                    "type",
                ]
                .join(",")
            ),
        ]
    }
}

// =============================================================================
// Recipe Filter
// =============================================================================

/// Filter for the recipe query
///
/// Filtering by pod and recipe together yields at most one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeFilter {
    #[serde(rename = "nPodUUID")]
    pub pod_id: Option<String>,
    #[serde(rename = "recipeUUID")]
    pub recipe_id: Option<String>,
    /// `true` only returns finished recipes, `false` only active ones
    pub completed: Option<bool>,
}

impl RecipeFilter {
    /// Filter for exactly one recipe of one nPod
    pub fn for_recipe(pod_id: impl Into<String>, recipe_id: impl Into<String>) -> Self {
        Self {
            pod_id: Some(pod_id.into()),
            recipe_id: Some(recipe_id.into()),
            completed: None,
        }
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }
}

/// Parse a control plane timestamp, falling back to the minimum datetime
pub fn parse_time(value: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn lenient_time<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_time(&raw))
}
