//! Apply outcomes recorded on change items

use serde::{Deserialize, Serialize};

/// Outcome of executing one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyScopeEffect {
    pub executed: bool,
    pub success: bool,
    pub partial: bool,
    pub error: Option<String>,
}

/// Named, ordered group of statements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyScope {
    pub name: String,
    pub statements: Vec<String>,
    pub effect: ApplyScopeEffect,
}

impl ApplyScope {
    pub fn new(name: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            name: name.into(),
            statements,
            effect: ApplyScopeEffect::default(),
        }
    }

    /// Record the outcome of the execution attempt
    pub fn set_effect(&mut self, success: bool, partial: bool, error: Option<String>) {
        self.effect = ApplyScopeEffect {
            executed: true,
            success,
            partial,
            error,
        };
    }
}

/// Summary returned by [`ApplyEffectInformation::is_success`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub success: bool,
    pub partial: bool,
    pub error: Option<String>,
}

/// Per-item apply record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEffectInformation {
    pub executed: bool,
    pub completed: bool,
    pub scopes: Vec<ApplyScope>,
    pub error: Option<String>,
}

impl ApplyEffectInformation {
    /// Mark the item as skipped before any statement ran
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.executed = false;
        self.completed = false;
        self.error = Some(reason.into());
    }

    pub fn is_success(&self) -> ApplyOutcome {
        if self.executed && self.completed && self.error.is_none() {
            return ApplyOutcome {
                success: true,
                partial: false,
                error: None,
            };
        }

        if let Some(scope) = self
            .scopes
            .iter()
            .find(|s| s.effect.executed && !s.effect.success)
        {
            return ApplyOutcome {
                success: false,
                partial: scope.effect.partial,
                error: scope.effect.error.clone(),
            };
        }

        ApplyOutcome {
            success: false,
            partial: false,
            error: Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "undefined error state".to_string()),
            ),
        }
    }

    /// True when every scope reported success
    pub fn all_scopes_succeeded(&self) -> bool {
        self.scopes.iter().all(|s| s.effect.executed && s.effect.success)
    }
}
