//! Program template repository.
//!
//! Templates with `company_id = NULL` are global and visible to every tenant.

use chrono::Utc;

use csr_core::entities::ProgramTemplate;
use csr_core::enums::{AuditAction, ProgramType, ResourceType};
use csr_core::ids::PREFIX_TEMPLATE;
use csr_core::shapes::ProgramConfig;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_bool, get_opt_string, parse_datetime, parse_enum, parse_json, to_json_text,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, name, program_type, description, default_config,
     version, is_active, created_at, updated_at";

fn row_to_template(row: &libsql::Row) -> Result<ProgramTemplate, DatabaseError> {
    Ok(ProgramTemplate {
        id: row.get::<String>(0)?,
        company_id: get_opt_string(row, 1)?,
        name: row.get::<String>(2)?,
        program_type: parse_enum(&row.get::<String>(3)?)?,
        description: get_opt_string(row, 4)?,
        default_config: parse_json(&row.get::<String>(5)?)?,
        version: row.get::<i64>(6)?,
        is_active: get_bool(row, 7)?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
        updated_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

impl CsrService {
    /// Create a template. `company_id = None` creates a global template, which
    /// is not written to any tenant's audit log.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT fails.
    pub async fn create_template(
        &self,
        company_id: Option<&str>,
        name: &str,
        program_type: ProgramType,
        description: Option<&str>,
        default_config: &ProgramConfig,
    ) -> Result<ProgramTemplate, DatabaseError> {
        if let Some(company_id) = company_id {
            self.check_tenant(company_id)?;
        }
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_TEMPLATE).await?;
        let config = to_json_text(default_config)?;

        self.db()
            .execute_with(
                "INSERT INTO program_templates (id, company_id, name, program_type, description,
                     default_config, version, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 1, ?7, ?7)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        name,
                        program_type.as_str(),
                        description,
                        config.as_str(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let template = ProgramTemplate {
            id: id.clone(),
            company_id: company_id.map(String::from),
            name: name.to_string(),
            program_type,
            description: description.map(String::from),
            default_config: default_config.clone(),
            version: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        if let Some(company_id) = company_id {
            self.record_audit(
                company_id,
                AuditAction::Created,
                ResourceType::ProgramTemplate,
                &id,
                None,
                Some(serde_json::to_value(&template)?),
            )
            .await?;
        }

        Ok(template)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the template does not exist, and
    /// `TenantMismatch` for another tenant's private template.
    pub async fn get_template(&self, id: &str) -> Result<ProgramTemplate, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM program_templates WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let template = row_to_template(&row)?;
        if let Some(ref company_id) = template.company_id {
            self.check_tenant(company_id)?;
        }
        Ok(template)
    }

    /// Active templates usable by a company: its own plus the global ones.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_templates(
        &self,
        company_id: &str,
        program_type: Option<ProgramType>,
    ) -> Result<Vec<ProgramTemplate>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM program_templates
                     WHERE (company_id = ?1 OR company_id IS NULL)
                       AND is_active = 1
                       AND (?2 IS NULL OR program_type = ?2)
                     ORDER BY company_id IS NULL, name"
                ),
                || libsql::params![company_id, program_type.map(ProgramType::as_str)],
            )
            .await?;
        collect_rows(rows, row_to_template).await
    }

    /// Hide a template from new campaigns. Existing campaigns keep it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the template does not exist.
    pub async fn deactivate_template(&self, id: &str) -> Result<ProgramTemplate, DatabaseError> {
        let current = self.get_template(id).await?;
        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE program_templates SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                || libsql::params![now.to_rfc3339(), id],
            )
            .await?;

        if let Some(ref company_id) = current.company_id {
            self.record_audit(
                company_id,
                AuditAction::Updated,
                ResourceType::ProgramTemplate,
                id,
                None,
                Some(serde_json::json!({ "is_active": false })),
            )
            .await?;
        }

        Ok(ProgramTemplate {
            is_active: false,
            updated_at: now,
            ..current
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::test_support::helpers::{actor_for, seed_company, seed_tenant, test_service};

    fn mentoring_config() -> ProgramConfig {
        ProgramConfig {
            session_length_minutes: Some(60),
            languages: vec!["de".into(), "en".into()],
            ..ProgramConfig::default()
        }
    }

    #[tokio::test]
    async fn config_roundtrips_through_json_column() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let created = svc
            .create_template(
                Some(&company.id),
                "Mentoring 1:1",
                ProgramType::Mentorship,
                None,
                &mentoring_config(),
            )
            .await
            .unwrap();

        let fetched = svc.get_template(&created.id).await.unwrap();
        assert_eq!(fetched.default_config, mentoring_config());
        assert_eq!(fetched.version, 1);
        assert!(fetched.is_active);
    }

    #[tokio::test]
    async fn list_includes_global_and_own_only() {
        let svc = test_service().await;
        let acme = seed_company(&svc, "acme").await;
        let globex = seed_company(&svc, "globex").await;

        svc.create_template(None, "Global Buddy", ProgramType::Buddy, None, &ProgramConfig::default())
            .await
            .unwrap();
        svc.create_template(Some(&acme.id), "Acme Language", ProgramType::Language, None, &ProgramConfig::default())
            .await
            .unwrap();
        svc.create_template(Some(&globex.id), "Globex Upskilling", ProgramType::Upskilling, None, &ProgramConfig::default())
            .await
            .unwrap();

        let names: Vec<String> = svc
            .list_templates(&acme.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Acme Language".to_string(), "Global Buddy".to_string()]);

        let buddy_only = svc
            .list_templates(&acme.id, Some(ProgramType::Buddy))
            .await
            .unwrap();
        assert_eq!(buddy_only.len(), 1);
    }

    #[tokio::test]
    async fn deactivated_templates_are_hidden() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let template = svc
            .create_template(Some(&company.id), "Old", ProgramType::Volunteering, None, &ProgramConfig::default())
            .await
            .unwrap();
        svc.deactivate_template(&template.id).await.unwrap();
        assert!(svc.list_templates(&company.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_template_of_other_tenant_is_rejected() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let globex = seed_company(&svc, "globex").await;
        let template = svc
            .create_template(Some(&globex.id), "Secret", ProgramType::Mentorship, None, &ProgramConfig::default())
            .await
            .unwrap();

        let svc = svc.with_actor(actor_for(&user));
        assert!(matches!(
            svc.get_template(&template.id).await,
            Err(DatabaseError::TenantMismatch { .. })
        ));
    }
}
