//! Cross-cutting error types for the CSR workspace.
//!
//! Domain-specific errors (`DatabaseError`, `SchemaError`, `ConfigError`) live
//! in their own crates.

use thiserror::Error;

use crate::validation::ValidationIssue;

/// Errors that can be raised by any CSR crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity lookup returned no result.
    #[error("Entity not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: String },

    /// A state machine transition was attempted that is not allowed.
    #[error("Invalid state transition: {entity_type} {id} from {from} to {to}")]
    InvalidTransition {
        entity_type: String,
        id: String,
        from: String,
        to: String,
    },

    /// Input failed one or more validation rules.
    #[error("Validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
