//! Database error types for csr-db.
//!
//! `libsql::Error` converts through [`DatabaseError::from`], which sorts
//! constraint and trigger failures into typed variants so callers can match on
//! a duplicate key or an append-only violation instead of parsing strings.

use csr_core::errors::CoreError;
use csr_core::validation::ValidationIssue;
use csr_schema::SchemaError;
use thiserror::Error;

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A SQL query failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Expected a result row but none was returned.
    #[error("No result returned")]
    NoResult,

    /// Invalid state encountered (bad transition, broken chain, bad data in DB).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A UNIQUE constraint rejected the write.
    #[error("Duplicate {table}.{key}")]
    Duplicate { table: String, key: String },

    /// Input failed validation, in Rust or in a CHECK constraint.
    #[error("Validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// A FOREIGN KEY constraint rejected the write or delete.
    #[error("Foreign key violation: {0}")]
    ForeignKey(String),

    /// An append-only table rejected an update or delete.
    #[error("Immutable row: {0}")]
    Immutable(String),

    /// The acting user belongs to another tenant.
    #[error("Actor of company {actor_company} cannot act on company {company}")]
    TenantMismatch {
        actor_company: String,
        company: String,
    },

    /// Underlying libSQL error.
    #[error("libSQL error: {0}")]
    LibSql(#[source] libsql::Error),

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

const UNIQUE_PREFIX: &str = "UNIQUE constraint failed: ";
const CHECK_PREFIX: &str = "CHECK constraint failed: ";

impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        let msg = e.to_string();

        if let Some(rest) = msg.split(UNIQUE_PREFIX).nth(1) {
            let (table, key) = parse_unique_target(rest);
            return Self::Duplicate { table, key };
        }
        if let Some(rest) = msg.split("immutable: ").nth(1) {
            return Self::Immutable(clean(rest));
        }
        if let Some(rest) = msg.split("chain: ").nth(1) {
            return Self::InvalidState(clean(rest));
        }
        if let Some(rest) = msg.split(CHECK_PREFIX).nth(1) {
            return Self::Validation(vec![ValidationIssue::new("check", clean(rest))]);
        }
        if msg.contains("FOREIGN KEY constraint failed") {
            return Self::ForeignKey(msg);
        }
        Self::LibSql(e)
    }
}

/// libSQL wraps `SQLite` messages in backticks.
fn clean(rest: &str) -> String {
    rest.trim().trim_end_matches('`').trim().to_string()
}

/// Split `"impact_deliveries.delivery_id"` or
/// `"nlq_safety_checks.query_id, nlq_safety_checks.check_name"` into the table
/// and a comma-joined column list.
fn parse_unique_target(rest: &str) -> (String, String) {
    let mut table = String::new();
    let mut columns = Vec::new();
    for part in rest.split(',') {
        let part = part.trim();
        match part.split_once('.') {
            Some((t, c)) => {
                if table.is_empty() {
                    table = t.to_string();
                }
                columns.push(c.trim_end_matches(|ch: char| !ch.is_alphanumeric() && ch != '_'));
            }
            None => columns.push(part),
        }
    }
    (table, columns.join(","))
}

impl From<CoreError> for DatabaseError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound { .. } => Self::NoResult,
            CoreError::InvalidTransition { .. } => Self::InvalidState(e.to_string()),
            CoreError::Validation(issues) => Self::Validation(issues),
            CoreError::Other(err) => Self::Other(err),
        }
    }
}

impl From<SchemaError> for DatabaseError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::ValidationFailed { errors } => Self::Validation(
                errors
                    .into_iter()
                    .map(|msg| ValidationIssue::new("schema", msg))
                    .collect(),
            ),
            SchemaError::RefinementFailed { issues } => Self::Validation(issues),
            other => Self::Other(other.into()),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Other(e.into())
    }
}
