//! Schema validation error types.

use csr_core::validation::ValidationIssue;
use thiserror::Error;

/// Errors from the schema registry.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Requested schema name was not found in the registry.
    #[error("Schema not found: {0}")]
    NotFound(String),

    /// JSON value did not pass schema validation.
    #[error("Validation failed: {errors:?}")]
    ValidationFailed {
        /// Individual error messages from the validator.
        errors: Vec<String>,
    },

    /// Value passed the schema but failed a cross-field or content rule.
    #[error("Refinement failed: {issues:?}")]
    RefinementFailed { issues: Vec<ValidationIssue> },

    /// Value passed the schema but could not be deserialized into the target type.
    #[error("Deserialization failed: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Schema generation or compilation error.
    #[error("Schema generation error: {0}")]
    Generation(String),
}
