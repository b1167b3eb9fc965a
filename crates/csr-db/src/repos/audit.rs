//! Tenant audit log repository.
//!
//! Append-only rows recording every mutation made through the service, with
//! before/after snapshots. Supports dynamic filtering.

use chrono::{DateTime, Utc};

use csr_core::entities::AuditLogEntry;
use csr_core::enums::{AuditAction, ResourceType};

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_optional_json,
    to_opt_json_text,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, actor_user_id, action, resource_type, resource_id,
     before_state, after_state, ip_address, user_agent, created_at";

fn row_to_audit(row: &libsql::Row) -> Result<AuditLogEntry, DatabaseError> {
    Ok(AuditLogEntry {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        actor_user_id: get_opt_string(row, 2)?,
        action: parse_enum(&row.get::<String>(3)?)?,
        resource_type: parse_enum(&row.get::<String>(4)?)?,
        resource_id: row.get::<String>(5)?,
        before_state: parse_optional_json(get_opt_string(row, 6)?.as_deref())?,
        after_state: parse_optional_json(get_opt_string(row, 7)?.as_deref())?,
        ip_address: get_opt_string(row, 8)?,
        user_agent: get_opt_string(row, 9)?,
        created_at: parse_datetime(&row.get::<String>(10)?)?,
    })
}

/// Filter criteria for audit queries. `company_id` is mandatory.
#[derive(Debug, Default)]
pub struct AuditFilter {
    pub company_id: String,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub action: Option<AuditAction>,
    pub actor_user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl AuditFilter {
    #[must_use]
    pub fn for_company(company_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn resource(mut self, resource_type: ResourceType, resource_id: &str) -> Self {
        self.resource_type = Some(resource_type);
        self.resource_id = Some(resource_id.to_string());
        self
    }
}

impl CsrService {
    /// Append an audit entry. Called by every mutation method.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT fails.
    pub async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), DatabaseError> {
        let before = to_opt_json_text(entry.before_state.as_ref())?;
        let after = to_opt_json_text(entry.after_state.as_ref())?;
        self.db()
            .execute_with(
                "INSERT INTO audit_logs (id, company_id, actor_user_id, action, resource_type,
                     resource_id, before_state, after_state, ip_address, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                || {
                    libsql::params![
                        entry.id.as_str(),
                        entry.company_id.as_str(),
                        entry.actor_user_id.as_deref(),
                        entry.action.as_str(),
                        entry.resource_type.as_str(),
                        entry.resource_id.as_str(),
                        before.as_deref(),
                        after.as_deref(),
                        entry.ip_address.as_deref(),
                        entry.user_agent.as_deref(),
                        entry.created_at.to_rfc3339()
                    ]
                },
            )
            .await?;
        Ok(())
    }

    /// Query audit entries with optional filters, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn query_audit(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        self.check_tenant(&filter.company_id)?;

        let mut params: Vec<libsql::Value> = vec![filter.company_id.clone().into()];
        let mut conditions = vec!["company_id = ?1".to_string()];

        if let Some(rt) = filter.resource_type {
            params.push(rt.as_str().into());
            conditions.push(format!("resource_type = ?{}", params.len()));
        }
        if let Some(ref rid) = filter.resource_id {
            params.push(rid.clone().into());
            conditions.push(format!("resource_id = ?{}", params.len()));
        }
        if let Some(action) = filter.action {
            params.push(action.as_str().into());
            conditions.push(format!("action = ?{}", params.len()));
        }
        if let Some(ref actor) = filter.actor_user_id {
            params.push(actor.clone().into());
            conditions.push(format!("actor_user_id = ?{}", params.len()));
        }
        if let Some(since) = filter.since {
            params.push(since.to_rfc3339().into());
            conditions.push(format!(
                "julianday(created_at) >= julianday(?{})",
                params.len()
            ));
        }

        let limit = self.limit_or_default(filter.limit);
        let sql = format!(
            "SELECT {SELECT_COLS} FROM audit_logs WHERE {}
             ORDER BY created_at DESC, rowid DESC LIMIT {limit}",
            conditions.join(" AND ")
        );

        let rows = self
            .db()
            .query_with(&sql, || libsql::params_from_iter(params.clone()))
            .await?;
        collect_rows(rows, row_to_audit).await
    }
}
