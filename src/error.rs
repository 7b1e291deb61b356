//! Error handling module
//!
//! Provides the unified error type shared by discovery, validation,
//! rendering, apply and tracking.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------
    #[error("No last processed commit found in the tracking log")]
    NoLastCommitFound,

    #[error("Target commit not found: {0}")]
    TargetCommitNotFound(String),

    #[error("No commits to process")]
    NoCommitsToProcess,

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Repository error: {0}")]
    Repository(#[from] git2::Error),

    // ------------------------------------------------------------------
    // Declarative documents
    // ------------------------------------------------------------------
    #[error("Unable to parse specification {file}: {source}")]
    SpecParse {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid specification payload for {0}")]
    InvalidSpecPayload(String),

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------
    #[error("Variable undefined: {0}")]
    VariableUndefined(String),

    #[error("Disallowed privileged role: {0}")]
    DisallowedPrivilegedRole(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unapproved command in rendered statement: {0}")]
    UnapprovedCommand(String),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    // ------------------------------------------------------------------
    // Target
    // ------------------------------------------------------------------
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Statement failed: {statement}: {message}")]
    Statement { statement: String, message: String },

    #[error("Unexpected result shape: {0}")]
    ResultShape(String),

    #[error("Apply cancelled")]
    Cancelled,

    #[error("Resource leak: temporary grants could not be revoked: {0}")]
    ResourceLeak(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Invalid target type: {0}")]
    InvalidTargetType(String),

    // ------------------------------------------------------------------
    // Configuration & secrets
    // ------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Invalid secret store type: {0}")]
    InvalidSecretStoreType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for errors that leave standing privileges on the target.
    pub fn is_resource_leak(&self) -> bool {
        matches!(self, AppError::ResourceLeak(_))
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a statement error
pub fn statement_error(statement: impl Into<String>, message: impl Into<String>) -> AppError {
    AppError::Statement {
        statement: statement.into(),
        message: message.into(),
    }
}

/// Helper function to create an internal error
pub fn internal_error(msg: impl Into<String>) -> AppError {
    AppError::Internal(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_leak_is_flagged() {
        assert!(AppError::ResourceLeak("GRANT".into()).is_resource_leak());
        assert!(!AppError::NoCommitsToProcess.is_resource_leak());
    }

    #[test]
    fn test_statement_error_message() {
        let err = statement_error("DROP TABLE X", "permission denied");
        assert_eq!(
            err.to_string(),
            "Statement failed: DROP TABLE X: permission denied"
        );
    }
}
