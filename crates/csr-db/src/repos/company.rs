//! Company (tenant) repository.

use chrono::Utc;

use csr_core::entities::Company;
use csr_core::enums::{AuditAction, CompanyStatus, ResourceType};
use csr_core::ids::PREFIX_COMPANY;
use csr_core::shapes::StatusChangedDetail;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_optional_json,
};
use crate::service::CsrService;

const SELECT_COLS: &str =
    "id, name, slug, industry, country_code, status, settings, created_at, updated_at";

fn row_to_company(row: &libsql::Row) -> Result<Company, DatabaseError> {
    Ok(Company {
        id: row.get::<String>(0)?,
        name: row.get::<String>(1)?,
        slug: row.get::<String>(2)?,
        industry: get_opt_string(row, 3)?,
        country_code: get_opt_string(row, 4)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        settings: parse_optional_json(get_opt_string(row, 6)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(7)?)?,
        updated_at: parse_datetime(&row.get::<String>(8)?)?,
    })
}

impl CsrService {
    /// Create a tenant. A taken slug surfaces as `DatabaseError::Duplicate`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT fails.
    pub async fn create_company(
        &self,
        name: &str,
        slug: &str,
        industry: Option<&str>,
        country_code: Option<&str>,
    ) -> Result<Company, DatabaseError> {
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_COMPANY).await?;

        self.db()
            .execute_with(
                "INSERT INTO companies (id, name, slug, industry, country_code, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)",
                || libsql::params![id.as_str(), name, slug, industry, country_code, now.to_rfc3339()],
            )
            .await?;

        let company = Company {
            id: id.clone(),
            name: name.to_string(),
            slug: slug.to_string(),
            industry: industry.map(String::from),
            country_code: country_code.map(String::from),
            status: CompanyStatus::Active,
            settings: None,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            &id,
            AuditAction::Created,
            ResourceType::Company,
            &id,
            None,
            Some(serde_json::to_value(&company)?),
        )
        .await?;

        Ok(company)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if no company has this id.
    pub async fn get_company(&self, id: &str) -> Result<Company, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM companies WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_company(&row)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the slug is unknown.
    pub async fn get_company_by_slug(&self, slug: &str) -> Result<Company, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM companies WHERE slug = ?1"),
                || [slug],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_company(&row)
    }

    /// List companies ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_companies(
        &self,
        status: Option<CompanyStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<Company>, DatabaseError> {
        let limit = self.limit_or_default(limit);
        let rows = match status {
            Some(status) => {
                self.db()
                    .query_with(
                        &format!(
                            "SELECT {SELECT_COLS} FROM companies WHERE status = ?1 ORDER BY name LIMIT ?2"
                        ),
                        || libsql::params![status.as_str(), limit],
                    )
                    .await?
            }
            None => {
                self.db()
                    .query_with(
                        &format!("SELECT {SELECT_COLS} FROM companies ORDER BY name LIMIT ?1"),
                        || libsql::params![limit],
                    )
                    .await?
            }
        };
        collect_rows(rows, row_to_company).await
    }

    /// Move a company through its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the transition is not allowed.
    pub async fn set_company_status(
        &self,
        id: &str,
        status: CompanyStatus,
        reason: Option<&str>,
    ) -> Result<Company, DatabaseError> {
        let current = self.get_company(id).await?;
        self.check_tenant(&current.id)?;

        if !current.status.can_transition_to(status) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition company {id} from {} to {status}",
                current.status
            )));
        }

        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE companies SET status = ?1, updated_at = ?2 WHERE id = ?3",
                || libsql::params![status.as_str(), now.to_rfc3339(), id],
            )
            .await?;

        self.record_audit(
            id,
            AuditAction::StatusChanged,
            ResourceType::Company,
            id,
            None,
            Some(serde_json::to_value(StatusChangedDetail {
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
                reason: reason.map(String::from),
            })?),
        )
        .await?;

        Ok(Company {
            status,
            updated_at: now,
            ..current
        })
    }
}
