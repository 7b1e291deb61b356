//! Validation findings recorded on change items

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a validation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The validator ran and found nothing wrong
    #[default]
    None,
    Info,
    Warning,
    Critical,
}

/// Result of one validator against one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStep {
    pub validator: String,
    pub success: bool,
    pub severity: Severity,
    pub error: Option<String>,
}

impl ValidationStep {
    pub fn passed(validator: &str) -> Self {
        Self {
            validator: validator.to_string(),
            success: true,
            severity: Severity::None,
            error: None,
        }
    }

    pub fn failed(validator: &str, severity: Severity, error: impl Into<String>) -> Self {
        Self {
            validator: validator.to_string(),
            success: false,
            severity,
            error: Some(error.into()),
        }
    }
}

/// Per-item validation summary, keyed by validator name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationInfo {
    pub critical: usize,
    pub warning: usize,
    pub success: usize,
    pub steps: BTreeMap<String, ValidationStep>,
}

impl ValidationInfo {
    /// Record a step; a second step from the same validator replaces the first
    pub fn add_step(&mut self, step: ValidationStep) {
        if let Some(previous) = self.steps.remove(&step.validator) {
            self.adjust(previous.severity, false);
        }
        self.adjust(step.severity, true);
        self.steps.insert(step.validator.clone(), step);
    }

    fn adjust(&mut self, severity: Severity, add: bool) {
        let counter = match severity {
            Severity::None => &mut self.success,
            Severity::Warning => &mut self.warning,
            Severity::Critical => &mut self.critical,
            Severity::Info => return,
        };
        if add {
            *counter += 1;
        } else {
            *counter = counter.saturating_sub(1);
        }
    }

    pub fn passed_validation(&self) -> bool {
        self.success > 0 && self.critical == 0
    }

    pub fn step(&self, validator: &str) -> Option<&ValidationStep> {
        self.steps.get(validator)
    }
}
