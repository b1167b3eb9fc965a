//! Evidence ledger: append-only hash chains plus their meta-audit log.
//!
//! Appends read the chain head and insert the next version in one
//! transaction. `UNIQUE(evidence_id, version)` decides concurrent appends and
//! the `evidence_ledger_chain_link` trigger rejects anything that does not
//! extend the head. Every append, verify, query, export and purge leaves a
//! `ledger_audit_log` row.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use csr_core::entities::{LedgerAuditEntry, LedgerEntry};
use csr_core::enums::{EvidenceType, LedgerEventType, LedgerOperation, LedgerOutcome};
use csr_core::ids::{PREFIX_LEDGER, PREFIX_LEDGER_AUDIT};
use csr_core::ledger::{ChainReport, content_digest, is_valid_digest, next_link, verify_chain};
use csr_core::shapes::{LedgerMetadata, VerifyDetail};
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_bool, get_opt_string, parse_datetime, parse_enum, parse_optional_datetime,
    parse_optional_json, parse_optional_typed_json, to_opt_json_text,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, evidence_id, evidence_type, company_id, content_digest,
     previous_digest, version, event_type, editor_id, editor_role, report_id, lineage_id,
     tamper_detected, tamper_details, recorded_at, effective_at, retention_until, ip_hash,
     user_agent_hash, metadata";

const AUDIT_COLS: &str = "id, company_id, operation, evidence_id, ledger_entry_id, actor_id,
     actor_role, outcome, detail, created_at";

/// One change to a piece of evidence, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceInput {
    pub evidence_id: String,
    pub evidence_type: EvidenceType,
    pub event_type: LedgerEventType,
    /// SHA-256 of the evidential content, lowercase hex.
    pub content_digest: String,
    pub report_id: Option<String>,
    pub lineage_id: Option<String>,
    pub effective_at: DateTime<Utc>,
    /// Overrides the configured default retention.
    pub retention_until: Option<DateTime<Utc>>,
    pub metadata: Option<LedgerMetadata>,
}

impl EvidenceInput {
    /// Input for `content`, effective now.
    #[must_use]
    pub fn new(
        evidence_id: &str,
        evidence_type: EvidenceType,
        event_type: LedgerEventType,
        content: &[u8],
    ) -> Self {
        Self {
            evidence_id: evidence_id.to_string(),
            evidence_type,
            event_type,
            content_digest: content_digest(content),
            report_id: None,
            lineage_id: None,
            effective_at: Utc::now(),
            retention_until: None,
            metadata: None,
        }
    }

    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.evidence_id.trim().is_empty() {
            issues.push(ValidationIssue::new("evidence_id", "must not be empty"));
        }
        if !is_valid_digest(&self.content_digest) {
            issues.push(ValidationIssue::new(
                "content_digest",
                "must be 64 lowercase hex characters",
            ));
        }
        if self
            .retention_until
            .is_some_and(|until| until < self.effective_at)
        {
            issues.push(ValidationIssue::new(
                "retention_until",
                "must not be before effective_at",
            ));
        }
        issues
    }
}

/// Filter criteria for ledger audit queries. `company_id` is mandatory.
#[derive(Debug, Default)]
pub struct LedgerAuditFilter {
    pub company_id: String,
    pub operation: Option<LedgerOperation>,
    pub evidence_id: Option<String>,
    pub outcome: Option<LedgerOutcome>,
    pub limit: Option<u32>,
}

impl LedgerAuditFilter {
    #[must_use]
    pub fn for_company(company_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn evidence(mut self, evidence_id: &str) -> Self {
        self.evidence_id = Some(evidence_id.to_string());
        self
    }

    #[must_use]
    pub const fn operation(mut self, operation: LedgerOperation) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// A chain removed by the retention purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgedChain {
    pub evidence_id: String,
    pub company_id: String,
    pub entries_removed: u64,
}

fn row_to_entry(row: &libsql::Row) -> Result<LedgerEntry, DatabaseError> {
    Ok(LedgerEntry {
        id: row.get::<String>(0)?,
        evidence_id: row.get::<String>(1)?,
        evidence_type: parse_enum(&row.get::<String>(2)?)?,
        company_id: row.get::<String>(3)?,
        content_digest: row.get::<String>(4)?,
        previous_digest: get_opt_string(row, 5)?,
        version: row.get::<i64>(6)?,
        event_type: parse_enum(&row.get::<String>(7)?)?,
        editor_id: get_opt_string(row, 8)?,
        editor_role: get_opt_string(row, 9)?,
        report_id: get_opt_string(row, 10)?,
        lineage_id: get_opt_string(row, 11)?,
        tamper_detected: get_bool(row, 12)?,
        tamper_details: get_opt_string(row, 13)?,
        recorded_at: parse_datetime(&row.get::<String>(14)?)?,
        effective_at: parse_datetime(&row.get::<String>(15)?)?,
        retention_until: parse_optional_datetime(get_opt_string(row, 16)?.as_deref())?,
        ip_hash: get_opt_string(row, 17)?,
        user_agent_hash: get_opt_string(row, 18)?,
        metadata: parse_optional_typed_json(get_opt_string(row, 19)?.as_deref())?,
    })
}

fn row_to_ledger_audit(row: &libsql::Row) -> Result<LedgerAuditEntry, DatabaseError> {
    Ok(LedgerAuditEntry {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        operation: parse_enum(&row.get::<String>(2)?)?,
        evidence_id: get_opt_string(row, 3)?,
        ledger_entry_id: get_opt_string(row, 4)?,
        actor_id: get_opt_string(row, 5)?,
        actor_role: get_opt_string(row, 6)?,
        outcome: parse_enum(&row.get::<String>(7)?)?,
        detail: parse_optional_json(get_opt_string(row, 8)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

/// Tenant-salted hash of a client attribute, so the raw value never lands in
/// the ledger and equal values do not correlate across tenants.
fn anonymise(company_id: &str, value: &str) -> String {
    content_digest(format!("{company_id}:{value}").as_bytes())
}

async fn load_chain(
    conn: &libsql::Connection,
    evidence_id: &str,
) -> Result<Vec<LedgerEntry>, DatabaseError> {
    let rows = conn
        .query(
            &format!(
                "SELECT {SELECT_COLS} FROM evidence_ledger WHERE evidence_id = ?1 ORDER BY version"
            ),
            [evidence_id],
        )
        .await?;
    collect_rows(rows, row_to_entry).await
}

async fn insert_entry(conn: &libsql::Connection, entry: &LedgerEntry) -> Result<(), DatabaseError> {
    let metadata = to_opt_json_text(entry.metadata.as_ref())?;
    conn.execute(
        "INSERT INTO evidence_ledger (id, evidence_id, evidence_type, company_id, content_digest,
             previous_digest, version, event_type, editor_id, editor_role, report_id, lineage_id,
             tamper_detected, recorded_at, effective_at, retention_until, ip_hash,
             user_agent_hash, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14, ?15, ?16, ?17, ?18)",
        libsql::params![
            entry.id.as_str(),
            entry.evidence_id.as_str(),
            entry.evidence_type.as_str(),
            entry.company_id.as_str(),
            entry.content_digest.as_str(),
            entry.previous_digest.as_deref(),
            entry.version,
            entry.event_type.as_str(),
            entry.editor_id.as_deref(),
            entry.editor_role.as_deref(),
            entry.report_id.as_deref(),
            entry.lineage_id.as_deref(),
            entry.recorded_at.to_rfc3339(),
            entry.effective_at.to_rfc3339(),
            entry.retention_until.map(|t| t.to_rfc3339()),
            entry.ip_hash.as_deref(),
            entry.user_agent_hash.as_deref(),
            metadata.as_deref()
        ],
    )
    .await?;
    Ok(())
}

async fn insert_ledger_audit(
    conn: &libsql::Connection,
    entry: &LedgerAuditEntry,
) -> Result<(), DatabaseError> {
    let detail = to_opt_json_text(entry.detail.as_ref())?;
    conn.execute(
        "INSERT INTO ledger_audit_log (id, company_id, operation, evidence_id, ledger_entry_id,
             actor_id, actor_role, outcome, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        libsql::params![
            entry.id.as_str(),
            entry.company_id.as_str(),
            entry.operation.as_str(),
            entry.evidence_id.as_deref(),
            entry.ledger_entry_id.as_deref(),
            entry.actor_id.as_deref(),
            entry.actor_role.as_deref(),
            entry.outcome.as_str(),
            detail.as_deref(),
            entry.created_at.to_rfc3339()
        ],
    )
    .await?;
    Ok(())
}

impl CsrService {
    /// Append the next version of an evidence chain.
    ///
    /// The first entry of a chain gets version 1 and no previous digest; each
    /// later one points at its predecessor's digest. Without an explicit
    /// `retention_until` the configured default retention applies.
    ///
    /// # Errors
    ///
    /// - `DatabaseError::Validation` for a malformed digest or retention.
    /// - `DatabaseError::TenantMismatch` if the chain belongs to another company.
    /// - `DatabaseError::InvalidState` if `verify_on_append` is set and the
    ///   existing chain is broken, or the head moved underneath the append.
    /// - `DatabaseError::Duplicate` if a concurrent append took the version.
    pub async fn append_evidence(
        &self,
        company_id: &str,
        input: &EvidenceInput,
    ) -> Result<LedgerEntry, DatabaseError> {
        self.check_tenant(company_id)?;
        let issues = input.issues();
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_LEDGER).await?;
        let retention_until = input.retention_until.or_else(|| {
            self.settings()
                .retention_days
                .map(|days| input.effective_at + Duration::days(i64::from(days)))
        });
        let actor = self.actor();

        let tx = self.db().conn().transaction().await?;
        let appended = async {
            let chain = load_chain(&tx, &input.evidence_id).await?;
            if let Some(owner) = chain.first().map(|e| e.company_id.as_str()) {
                if owner != company_id {
                    return Err(DatabaseError::TenantMismatch {
                        actor_company: company_id.to_string(),
                        company: owner.to_string(),
                    });
                }
            }
            if self.settings().verify_on_append && !chain.is_empty() {
                let report = verify_chain(&input.evidence_id, &chain, |_| None);
                if !report.is_intact() {
                    return Err(DatabaseError::InvalidState(format!(
                        "evidence chain {} is broken at versions {:?}, refusing to append",
                        input.evidence_id,
                        report.tampered_versions()
                    )));
                }
            }

            let (version, previous_digest) = next_link(chain.last());
            let entry = LedgerEntry {
                id: id.clone(),
                evidence_id: input.evidence_id.clone(),
                evidence_type: input.evidence_type,
                company_id: company_id.to_string(),
                content_digest: input.content_digest.clone(),
                previous_digest,
                version,
                event_type: input.event_type,
                editor_id: actor.map(|a| a.user_id.clone()),
                editor_role: actor.map(|a| a.role.as_str().to_string()),
                report_id: input.report_id.clone(),
                lineage_id: input.lineage_id.clone(),
                tamper_detected: false,
                tamper_details: None,
                recorded_at: now,
                effective_at: input.effective_at,
                retention_until,
                ip_hash: actor
                    .and_then(|a| a.ip_address.as_deref())
                    .map(|ip| anonymise(company_id, ip)),
                user_agent_hash: actor
                    .and_then(|a| a.user_agent.as_deref())
                    .map(|ua| anonymise(company_id, ua)),
                metadata: input.metadata.clone(),
            };
            insert_entry(&tx, &entry).await?;

            let audit = LedgerAuditEntry {
                evidence_id: Some(entry.evidence_id.clone()),
                ledger_entry_id: Some(entry.id.clone()),
                detail: Some(json!({
                    "version": entry.version,
                    "content_digest": entry.content_digest,
                })),
                ..self
                    .new_ledger_audit(company_id, LedgerOperation::Append, LedgerOutcome::Success)
                    .await?
            };
            insert_ledger_audit(&tx, &audit).await?;
            Ok(entry)
        }
        .await;

        let entry = match appended {
            Ok(entry) => {
                tx.commit().await?;
                entry
            }
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        tracing::info!(
            evidence_id = %entry.evidence_id,
            version = entry.version,
            company_id,
            "evidence appended"
        );
        Ok(entry)
    }

    /// Every version of a chain, oldest first. Logged as a ledger query.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TenantMismatch` if the chain belongs to
    /// another company.
    pub async fn evidence_history(&self, evidence_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let chain = self.fetch_chain(evidence_id).await?;
        if let Some(first) = chain.first() {
            self.log_ledger_operation(
                &first.company_id,
                LedgerOperation::Query,
                Some(evidence_id),
                LedgerOutcome::Success,
                Some(json!({ "entries": chain.len() })),
            )
            .await?;
        }
        Ok(chain)
    }

    /// The chain head, if the chain exists.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TenantMismatch` if the chain belongs to
    /// another company.
    pub async fn latest_evidence_entry(
        &self,
        evidence_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM evidence_ledger WHERE evidence_id = ?1
                     ORDER BY version DESC LIMIT 1"
                ),
                || [evidence_id],
            )
            .await?;
        let head = rows.next().await?.map(|row| row_to_entry(&row)).transpose()?;
        if let Some(ref head) = head {
            self.check_tenant(&head.company_id)?;
        }
        Ok(head)
    }

    /// Entries cited by one report, grouped by chain.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_evidence_for_report(
        &self,
        company_id: &str,
        report_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM evidence_ledger
                     WHERE company_id = ?1 AND report_id = ?2
                     ORDER BY evidence_id, version"
                ),
                || [company_id, report_id],
            )
            .await?;
        collect_rows(rows, row_to_entry).await
    }

    /// Entries flagged by a previous verification.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_tampered_entries(
        &self,
        company_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM evidence_ledger
                     WHERE company_id = ?1 AND tamper_detected = 1
                     ORDER BY evidence_id, version"
                ),
                || [company_id],
            )
            .await?;
        collect_rows(rows, row_to_entry).await
    }

    /// Walk a chain, flag every broken entry, and log the run.
    ///
    /// `recompute` returns the digest of an entry's evidence content when the
    /// caller can reproduce it, or `None` to check linkage only. Entries with
    /// violations get `tamper_detected = 1` and a description; flags already
    /// raised are left as they are.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the chain does not exist.
    pub async fn verify_evidence_chain<F>(
        &self,
        evidence_id: &str,
        mut recompute: F,
    ) -> Result<ChainReport, DatabaseError>
    where
        F: FnMut(&LedgerEntry) -> Option<String>,
    {
        let chain = self.fetch_chain(evidence_id).await?;
        let company_id = chain
            .first()
            .map(|e| e.company_id.clone())
            .ok_or(DatabaseError::NoResult)?;

        let mut content_recomputed = false;
        let report = verify_chain(evidence_id, &chain, |entry| {
            let digest = recompute(entry);
            content_recomputed |= digest.is_some();
            digest
        });

        for version in report.tampered_versions() {
            let details = report.describe_version(version);
            let flagged = self
                .db()
                .execute_with(
                    "UPDATE evidence_ledger SET tamper_detected = 1, tamper_details = ?1
                     WHERE evidence_id = ?2 AND version = ?3 AND tamper_detected = 0",
                    || libsql::params![details.as_str(), evidence_id, version],
                )
                .await?;
            if flagged > 0 {
                tracing::warn!(evidence_id, version, %details, "evidence tamper detected");
            }
        }

        let detail = VerifyDetail {
            entries_checked: report.entries_checked,
            violations: report.violations.iter().map(ToString::to_string).collect(),
            content_recomputed,
        };
        let outcome = if report.is_intact() {
            LedgerOutcome::Success
        } else {
            LedgerOutcome::Failure
        };
        self.log_ledger_operation(
            &company_id,
            LedgerOperation::Verify,
            Some(evidence_id),
            outcome,
            Some(serde_json::to_value(&detail)?),
        )
        .await?;

        Ok(report)
    }

    /// Delete every chain whose entries have all passed `retention_until`.
    /// A chain with one entry still under retention is kept whole. With an
    /// actor attached only the actor's company is purged.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if a DELETE or audit insert fails.
    pub async fn purge_expired_evidence(&self) -> Result<Vec<PurgedChain>, DatabaseError> {
        let scope = self.actor().map(|a| a.company_id.clone());
        let rows = self
            .db()
            .query_with(
                "SELECT evidence_id, company_id, COUNT(*), MAX(version)
                 FROM evidence_ledger
                 WHERE (?1 IS NULL OR company_id = ?1)
                 GROUP BY evidence_id, company_id
                 HAVING SUM(CASE WHEN retention_until IS NULL
                                   OR julianday(retention_until) > julianday('now')
                                 THEN 1 ELSE 0 END) = 0",
                || libsql::params![scope.as_deref()],
            )
            .await?;
        let expired = collect_rows(rows, |row| {
            Ok((
                row.get::<String>(0)?,
                row.get::<String>(1)?,
                row.get::<i64>(2)?,
                row.get::<i64>(3)?,
            ))
        })
        .await?;

        let mut purged = Vec::with_capacity(expired.len());
        for (evidence_id, company_id, count, head_version) in expired {
            let tx = self.db().conn().transaction().await?;
            let removed = async {
                let removed = tx
                    .execute(
                        "DELETE FROM evidence_ledger WHERE evidence_id = ?1",
                        [evidence_id.as_str()],
                    )
                    .await?;
                let audit = LedgerAuditEntry {
                    evidence_id: Some(evidence_id.clone()),
                    detail: Some(json!({
                        "entries_removed": removed,
                        "head_version": head_version,
                    })),
                    ..self
                        .new_ledger_audit(
                            &company_id,
                            LedgerOperation::RetentionPurge,
                            LedgerOutcome::Success,
                        )
                        .await?
                };
                insert_ledger_audit(&tx, &audit).await?;
                Ok::<u64, DatabaseError>(removed)
            }
            .await;

            let removed = match removed {
                Ok(removed) => {
                    tx.commit().await?;
                    removed
                }
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e);
                }
            };
            if removed != count.unsigned_abs() {
                tracing::warn!(
                    %evidence_id,
                    removed,
                    expected = count,
                    "purge removed a different number of entries than scanned"
                );
            }
            tracing::info!(%evidence_id, %company_id, removed, "evidence chain purged");
            purged.push(PurgedChain {
                evidence_id,
                company_id,
                entries_removed: removed,
            });
        }
        Ok(purged)
    }

    /// Query the ledger audit log, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn query_ledger_audit(
        &self,
        filter: &LedgerAuditFilter,
    ) -> Result<Vec<LedgerAuditEntry>, DatabaseError> {
        self.check_tenant(&filter.company_id)?;

        let mut params: Vec<libsql::Value> = vec![filter.company_id.clone().into()];
        let mut conditions = vec!["company_id = ?1".to_string()];

        if let Some(op) = filter.operation {
            params.push(op.as_str().into());
            conditions.push(format!("operation = ?{}", params.len()));
        }
        if let Some(ref evidence_id) = filter.evidence_id {
            params.push(evidence_id.clone().into());
            conditions.push(format!("evidence_id = ?{}", params.len()));
        }
        if let Some(outcome) = filter.outcome {
            params.push(outcome.as_str().into());
            conditions.push(format!("outcome = ?{}", params.len()));
        }

        let limit = self.limit_or_default(filter.limit);
        let sql = format!(
            "SELECT {AUDIT_COLS} FROM ledger_audit_log WHERE {}
             ORDER BY julianday(created_at) DESC, rowid DESC LIMIT {limit}",
            conditions.join(" AND ")
        );
        let rows = self
            .db()
            .query_with(&sql, || libsql::params_from_iter(params.clone()))
            .await?;
        collect_rows(rows, row_to_ledger_audit).await
    }

    /// A chain in version order, tenant-checked, without an audit row.
    pub(crate) async fn fetch_chain(
        &self,
        evidence_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let chain = load_chain(self.db().conn(), evidence_id).await?;
        if let Some(first) = chain.first() {
            self.check_tenant(&first.company_id)?;
        }
        Ok(chain)
    }

    pub(crate) async fn log_ledger_operation(
        &self,
        company_id: &str,
        operation: LedgerOperation,
        evidence_id: Option<&str>,
        outcome: LedgerOutcome,
        detail: Option<Value>,
    ) -> Result<LedgerAuditEntry, DatabaseError> {
        let entry = LedgerAuditEntry {
            evidence_id: evidence_id.map(String::from),
            detail,
            ..self.new_ledger_audit(company_id, operation, outcome).await?
        };
        insert_ledger_audit(self.db().conn(), &entry).await?;
        Ok(entry)
    }

    async fn new_ledger_audit(
        &self,
        company_id: &str,
        operation: LedgerOperation,
        outcome: LedgerOutcome,
    ) -> Result<LedgerAuditEntry, DatabaseError> {
        Ok(LedgerAuditEntry {
            id: self.db().generate_id(PREFIX_LEDGER_AUDIT).await?,
            company_id: company_id.to_string(),
            operation,
            evidence_id: None,
            ledger_entry_id: None,
            actor_id: self.actor().map(|a| a.user_id.clone()),
            actor_role: self.actor().map(|a| a.role.as_str().to_string()),
            outcome,
            detail: None,
            created_at: Utc::now(),
        })
    }
}
