//! # csr-db
//!
//! libSQL storage for the CSR / impact-reporting platform.
//!
//! Owns the relational schema (embedded SQL migrations), the database handle
//! [`CsrDb`], and [`service::CsrService`], whose per-domain repositories read
//! and write tenants, programs, webhook dedup tables, NLQ logs, and the
//! evidence ledger. Every mutation through the service lands in `audit_logs`.
//!
//! Local files and `:memory:` databases are opened with
//! [`CsrDb::open_local`]; Turso embedded replicas with
//! [`CsrDb::open_remote_replica`].

pub mod error;
pub mod export;
pub mod helpers;
mod migrations;
pub mod repos;
pub mod retry;
pub mod service;
mod test_support;
pub mod updates;

use std::path::Path;
use std::time::Duration;

use csr_config::DatabaseConfig;
use libsql::Builder;
use libsql::params::IntoParams;

use error::DatabaseError;
use retry::{RetryConfig, is_transient_turso_error};

/// Central database handle.
///
/// Wraps a libSQL database and one connection. Provides ID generation and
/// retrying `execute_with` / `query_with` used by every repository.
pub struct CsrDb {
    db: libsql::Database,
    conn: libsql::Connection,
    remote: bool,
    retry: RetryConfig,
}

impl CsrDb {
    /// Open a local-only database at the given path (`":memory:"` for tests).
    ///
    /// Runs migrations automatically on open.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or
    /// migrations fail.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Other(anyhow::anyhow!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        Self::finish_open(db, conn, false).await
    }

    /// Open a Turso embedded replica and pull remote state before migrating.
    ///
    /// `sync_interval` enables periodic background sync; `None` means
    /// manual [`Self::sync`] only.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the replica cannot be built, the initial
    /// sync fails, or migrations fail.
    pub async fn open_remote_replica(
        local_path: &str,
        url: &str,
        auth_token: &str,
        sync_interval: Option<Duration>,
    ) -> Result<Self, DatabaseError> {
        let mut builder =
            Builder::new_remote_replica(local_path, url.to_string(), auth_token.to_string())
                .read_your_writes(true);
        if let Some(interval) = sync_interval {
            builder = builder.sync_interval(interval);
        }
        let db = builder.build().await?;
        db.sync().await?;
        let conn = db.connect()?;
        tracing::info!(url, local_path, "opened remote replica");
        Self::finish_open(db, conn, true).await
    }

    /// Open whatever `config` describes.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if opening fails.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if config.is_remote() {
            let interval = (config.sync_interval_secs > 0)
                .then(|| Duration::from_secs(config.sync_interval_secs));
            Self::open_remote_replica(
                &config.local_replica_path,
                &config.url,
                &config.auth_token,
                interval,
            )
            .await
        } else {
            Self::open_local(&config.path).await
        }
    }

    async fn finish_open(
        db: libsql::Database,
        conn: libsql::Connection,
        remote: bool,
    ) -> Result<Self, DatabaseError> {
        // Foreign keys are per-connection in SQLite.
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("PRAGMA foreign_keys: {e}")))?;

        let csr_db = Self {
            db,
            conn,
            remote,
            retry: RetryConfig::default(),
        };
        csr_db.run_migrations().await?;
        Ok(csr_db)
    }

    /// Replace the retry policy used for transient remote errors.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Access the underlying libSQL connection for direct queries.
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }

    #[must_use]
    pub const fn is_remote_replica(&self) -> bool {
        self.remote
    }

    /// Pull and push frames against the remote primary. No-op for local databases.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the sync fails.
    pub async fn sync(&self) -> Result<(), DatabaseError> {
        if !self.remote {
            return Ok(());
        }
        self.db.sync().await?;
        tracing::debug!("replica synced");
        Ok(())
    }

    /// Generate a prefixed ID via libSQL. Returns e.g. `"led-3fa85f6457174562"`.
    ///
    /// Uses `randomblob(8)` in SQL to produce 16 hex chars, then prepends the prefix.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or returns no rows.
    pub async fn generate_id(&self, prefix: &str) -> Result<String, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT '{prefix}-' || lower(hex(randomblob(8)))"),
                (),
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let id = row.get::<String>(0)?;
        tracing::debug!(%id, "generated id");
        Ok(id)
    }

    /// Execute a statement once, without retry.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statement fails.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<u64, DatabaseError> {
        Ok(self.conn.execute(sql, params).await?)
    }

    /// Run a query once, without retry.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn query(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<libsql::Rows, DatabaseError> {
        Ok(self.conn.query(sql, params).await?)
    }

    /// Execute a statement, retrying transient remote errors.
    ///
    /// `params` is a closure because libSQL consumes parameters and each
    /// attempt needs a fresh set.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` on a non-transient failure or once retries
    /// are exhausted.
    pub async fn execute_with<P, F>(&self, sql: &str, params: F) -> Result<u64, DatabaseError>
    where
        P: IntoParams,
        F: Fn() -> P,
    {
        let mut attempt = 1;
        loop {
            match self.conn.execute(sql, params()).await {
                Ok(changed) => return Ok(changed),
                Err(e) if self.should_retry(&e, attempt) => {
                    self.back_off(&e, attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run a query, retrying transient remote errors.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` on a non-transient failure or once retries
    /// are exhausted.
    pub async fn query_with<P, F>(&self, sql: &str, params: F) -> Result<libsql::Rows, DatabaseError>
    where
        P: IntoParams,
        F: Fn() -> P,
    {
        let mut attempt = 1;
        loop {
            match self.conn.query(sql, params()).await {
                Ok(rows) => return Ok(rows),
                Err(e) if self.should_retry(&e, attempt) => {
                    self.back_off(&e, attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn should_retry(&self, e: &libsql::Error, attempt: u32) -> bool {
        self.remote && is_transient_turso_error(e) && self.retry.allows_retry_after(attempt)
    }

    async fn back_off(&self, e: &libsql::Error, attempt: u32) {
        let delay = self.retry.delay_for(attempt);
        tracing::warn!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %e,
            "transient remote error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    async fn test_db() -> CsrDb {
        CsrDb::open_local(":memory:").await.unwrap()
    }

    async fn table_exists(db: &CsrDb, name: &str) -> bool {
        let mut rows = db
            .conn()
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().is_some()
    }

    #[tokio::test]
    async fn open_local_creates_schema() {
        let db = test_db().await;
        let tables = [
            "companies",
            "users",
            "audit_logs",
            "pii_vault",
            "consent_records",
            "billing_subscriptions",
            "entitlement_policies",
            "program_templates",
            "beneficiary_groups",
            "campaigns",
            "program_instances",
            "buddy_matches",
            "buddy_system_events",
            "impact_deliveries",
            "event_deduplication",
            "api_request_deduplication",
            "nlq_queries",
            "nlq_queries_fts",
            "nlq_safety_checks",
            "notifications",
            "publications",
            "scenarios",
            "metric_snapshots",
            "evidence_ledger",
            "ledger_audit_log",
        ];
        for table in tables {
            assert!(table_exists(&db, table).await, "table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = test_db().await;
        let result = db
            .execute(
                "INSERT INTO users (id, company_id, email) VALUES ('usr-x', 'cmp-missing', 'a@b.c')",
                (),
            )
            .await;
        assert!(matches!(result, Err(DatabaseError::ForeignKey(_))));
    }

    #[tokio::test]
    async fn generate_id_correct_format() {
        let db = test_db().await;
        let id = db.generate_id("led").await.unwrap();
        assert!(id.starts_with("led-"), "ID should start with 'led-': {id}");
        assert_eq!(id.len(), 20, "3 prefix + 1 dash + 16 hex: {id}");
        assert!(
            id[4..]
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[tokio::test]
    async fn generate_id_all_prefixes() {
        let db = test_db().await;
        for prefix in csr_core::ids::ALL_PREFIXES {
            let id = db.generate_id(prefix).await.unwrap();
            assert!(id.starts_with(&format!("{prefix}-")));
        }
    }

    #[tokio::test]
    async fn generate_id_uniqueness() {
        let db = test_db().await;
        let mut ids = HashSet::new();
        for _ in 0..200 {
            let id = db.generate_id("tst").await.unwrap();
            assert!(ids.insert(id.clone()), "Duplicate ID generated: {id}");
        }
    }

    #[tokio::test]
    async fn idempotent_migrations() {
        let db = test_db().await;
        db.run_migrations().await.unwrap();
        assert!(table_exists(&db, "evidence_ledger").await);
    }

    #[tokio::test]
    async fn sync_is_noop_for_local() {
        let db = test_db().await;
        assert!(!db.is_remote_replica());
        db.sync().await.unwrap();
    }

    #[tokio::test]
    async fn local_errors_surface_without_retry() {
        let db = test_db().await.with_retry(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        });
        let result = db
            .execute_with("INSERT INTO no_such_table VALUES (1)", || ())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn open_local_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("csr.db");
        let db = CsrDb::open_local(path.to_str().unwrap()).await.unwrap();
        assert!(table_exists(&db, "companies").await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn open_uses_local_path_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("csr.db").to_string_lossy().into_owned(),
            ..DatabaseConfig::default()
        };
        let db = CsrDb::open(&config).await.unwrap();
        assert!(!db.is_remote_replica());
    }

    #[tokio::test]
    async fn fts5_trigger_populates_on_insert() {
        let db = test_db().await;
        db.execute("INSERT INTO companies (id, name, slug) VALUES ('cmp-1', 'Acme', 'acme')", ())
            .await
            .unwrap();
        db.execute(
            "INSERT INTO nlq_queries (id, company_id, question) VALUES ('nlq-1', 'cmp-1', 'How many volunteering hours last quarter?')",
            (),
        )
        .await
        .unwrap();

        // Porter stemming: "volunteer" matches "volunteering".
        let mut rows = db
            .query(
                "SELECT q.id FROM nlq_queries_fts JOIN nlq_queries q ON q.rowid = nlq_queries_fts.rowid
                 WHERE nlq_queries_fts MATCH 'volunteer'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "nlq-1");
    }
}
