//! Database migration runner.
//!
//! Embeds the SQL migration files at compile time and executes them on
//! database open. All statements use `IF NOT EXISTS` for idempotent re-running.

use crate::CsrDb;
use crate::error::DatabaseError;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_tenancy", include_str!("../migrations/001_tenancy.sql")),
    ("002_programs", include_str!("../migrations/002_programs.sql")),
    ("003_integration", include_str!("../migrations/003_integration.sql")),
    ("004_reporting", include_str!("../migrations/004_reporting.sql")),
    ("005_evidence_ledger", include_str!("../migrations/005_evidence_ledger.sql")),
];

impl CsrDb {
    /// Run all embedded migrations in sequence.
    pub(crate) async fn run_migrations(&self) -> Result<(), DatabaseError> {
        for (name, sql) in MIGRATIONS {
            self.conn
                .execute_batch(sql)
                .await
                .map_err(|e| DatabaseError::Migration(format!("{name}: {e}")))?;
            tracing::debug!(migration = name, "applied");
        }
        Ok(())
    }
}
