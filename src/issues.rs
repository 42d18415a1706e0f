//! Pre-flight Issues
//!
//! The control plane predicts problems with a proposed mutation before any
//! token is issued. Errors always block the mutation; warnings block it
//! unless the caller explicitly chooses to ignore them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

// =============================================================================
// Issue Types
// =============================================================================

/// A single warning or error reported for a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Serial numbers of the SPUs the issue applies to
    #[serde(rename = "spuSerials", default)]
    pub affected_device_ids: Option<Vec<String>>,
    /// Human readable description
    pub message: String,
}

impl Issue {
    /// Create an issue that is not tied to a device
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            affected_device_ids: None,
            message: message.into(),
        }
    }

    /// Attach affected device serials
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_device_ids = Some(devices.into_iter().map(Into::into).collect());
        self
    }
}

/// Warnings and errors predicted for a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issues {
    pub warnings: Vec<Issue>,
    pub errors: Vec<Issue>,
}

impl Issues {
    /// GraphQL selection for an issues object
    pub fn fields() -> String {
        "warnings{spuSerials,message},errors{spuSerials,message}".to_string()
    }

    /// Check whether there is anything to report at all
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    /// Gate a mutation on the reported issues
    ///
    /// Fails when any error is present, or when warnings are present and
    /// `ignore_warnings` is false. Errors are reported in preference to
    /// warnings.
    pub fn validate(&self, ignore_warnings: bool) -> Result<()> {
        if !self.errors.is_empty() {
            return Err(Error::Validation(render("errors", &self.errors)));
        }

        if !self.warnings.is_empty() && !ignore_warnings {
            return Err(Error::Validation(render("warnings", &self.warnings)));
        }

        Ok(())
    }
}

fn render(kind: &str, issues: &[Issue]) -> String {
    let mut message = format!("validation failed with {} {}\n", issues.len(), kind);

    for issue in issues {
        let devices = issue.affected_device_ids.as_deref().unwrap_or_default();
        if !devices.is_empty() {
            let _ = write!(message, "\t{}: ", devices.join(", "));
        }
        let _ = writeln!(message, "{}", issue.message);
    }

    message
}
