//! Campaign repository.

use chrono::{NaiveDate, Utc};

use csr_core::entities::Campaign;
use csr_core::enums::{AuditAction, CampaignStatus, ResourceType};
use csr_core::ids::PREFIX_CAMPAIGN;
use csr_core::shapes::StatusChangedDetail;
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_date, parse_datetime, parse_enum, parse_optional_date,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, template_id, beneficiary_group_id, name, status,
     start_date, end_date, target_volunteers, target_beneficiaries, budget_allocated, currency,
     created_by, created_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fields supplied when creating a campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignInput {
    pub template_id: String,
    pub beneficiary_group_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub target_volunteers: i64,
    pub target_beneficiaries: i64,
    pub budget_allocated: Option<f64>,
    /// ISO 4217; `EUR` when `None`.
    pub currency: Option<String>,
}

impl CampaignInput {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::new("name", "must not be empty"));
        }
        if self.end_date.is_some_and(|end| end < self.start_date) {
            issues.push(ValidationIssue::new(
                "end_date",
                "must not be before start_date",
            ));
        }
        if self.target_volunteers < 0 {
            issues.push(ValidationIssue::new("target_volunteers", "must not be negative"));
        }
        if self.target_beneficiaries < 0 {
            issues.push(ValidationIssue::new(
                "target_beneficiaries",
                "must not be negative",
            ));
        }
        if self.budget_allocated.is_some_and(|b| b < 0.0) {
            issues.push(ValidationIssue::new("budget_allocated", "must not be negative"));
        }
        if let Some(ref currency) = self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                issues.push(ValidationIssue::new("currency", "must be an ISO 4217 code"));
            }
        }
        issues
    }
}

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, DatabaseError> {
    Ok(Campaign {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        template_id: row.get::<String>(2)?,
        beneficiary_group_id: row.get::<String>(3)?,
        name: row.get::<String>(4)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        start_date: parse_date(&row.get::<String>(6)?)?,
        end_date: parse_optional_date(get_opt_string(row, 7)?.as_deref())?,
        target_volunteers: row.get::<i64>(8)?,
        target_beneficiaries: row.get::<i64>(9)?,
        budget_allocated: row.get::<Option<f64>>(10)?,
        currency: row.get::<String>(11)?,
        created_by: get_opt_string(row, 12)?,
        created_at: parse_datetime(&row.get::<String>(13)?)?,
        updated_at: parse_datetime(&row.get::<String>(14)?)?,
    })
}

impl CsrService {
    /// Create a draft campaign running a template for one of the company's
    /// beneficiary groups.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` for bad input or an inactive
    /// template or group, and `TenantMismatch` when either belongs to another
    /// company.
    pub async fn create_campaign(
        &self,
        company_id: &str,
        input: &CampaignInput,
    ) -> Result<Campaign, DatabaseError> {
        self.check_tenant(company_id)?;
        let mut issues = input.issues();

        let template = self.get_template(&input.template_id).await?;
        if let Some(ref owner) = template.company_id {
            if owner != company_id {
                return Err(DatabaseError::TenantMismatch {
                    actor_company: company_id.to_string(),
                    company: owner.clone(),
                });
            }
        }
        if !template.is_active {
            issues.push(ValidationIssue::new("template_id", "template is inactive"));
        }

        let group = self.get_beneficiary_group(&input.beneficiary_group_id).await?;
        if group.company_id != company_id {
            return Err(DatabaseError::TenantMismatch {
                actor_company: company_id.to_string(),
                company: group.company_id,
            });
        }
        if !group.is_active {
            issues.push(ValidationIssue::new(
                "beneficiary_group_id",
                "beneficiary group is inactive",
            ));
        }
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_CAMPAIGN).await?;
        let created_by = self.actor().map(|a| a.user_id.clone());
        let currency = input.currency.clone().unwrap_or_else(|| "EUR".to_string());
        let name = input.name.trim().to_string();
        let start = input.start_date.format(DATE_FORMAT).to_string();
        let end = input
            .end_date
            .map(|d| d.format(DATE_FORMAT).to_string());

        self.db()
            .execute_with(
                "INSERT INTO campaigns (id, company_id, template_id, beneficiary_group_id, name,
                     status, start_date, end_date, target_volunteers, target_beneficiaries,
                     budget_allocated, currency, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'draft', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        input.template_id.as_str(),
                        input.beneficiary_group_id.as_str(),
                        name.as_str(),
                        start.as_str(),
                        end.as_deref(),
                        input.target_volunteers,
                        input.target_beneficiaries,
                        input.budget_allocated,
                        currency.as_str(),
                        created_by.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let campaign = Campaign {
            id: id.clone(),
            company_id: company_id.to_string(),
            template_id: input.template_id.clone(),
            beneficiary_group_id: input.beneficiary_group_id.clone(),
            name,
            status: CampaignStatus::Draft,
            start_date: input.start_date,
            end_date: input.end_date,
            target_volunteers: input.target_volunteers,
            target_beneficiaries: input.target_beneficiaries,
            budget_allocated: input.budget_allocated,
            currency,
            created_by,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::Campaign,
            &id,
            None,
            Some(serde_json::to_value(&campaign)?),
        )
        .await?;

        Ok(campaign)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the campaign does not exist.
    pub async fn get_campaign(&self, id: &str) -> Result<Campaign, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM campaigns WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let campaign = row_to_campaign(&row)?;
        self.check_tenant(&campaign.company_id)?;
        Ok(campaign)
    }

    /// Campaigns of a company, newest start date first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_campaigns(
        &self,
        company_id: &str,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM campaigns
                     WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY start_date DESC, created_at DESC"
                ),
                || libsql::params![company_id, status.map(CampaignStatus::as_str)],
            )
            .await?;
        collect_rows(rows, row_to_campaign).await
    }

    /// Move a campaign along its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the transition is not allowed.
    pub async fn transition_campaign(
        &self,
        id: &str,
        to: CampaignStatus,
        reason: Option<&str>,
    ) -> Result<Campaign, DatabaseError> {
        let current = self.get_campaign(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition campaign {id} from {} to {to}",
                current.status
            )));
        }

        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
                || libsql::params![to.as_str(), now.to_rfc3339(), id],
            )
            .await?;

        let detail = StatusChangedDetail {
            from: current.status.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: reason.map(String::from),
        };
        self.record_audit(
            &current.company_id,
            AuditAction::StatusChanged,
            ResourceType::Campaign,
            id,
            None,
            Some(serde_json::to_value(&detail)?),
        )
        .await?;

        Ok(Campaign {
            status: to,
            updated_at: now,
            ..current
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::repos::audit::AuditFilter;
    use crate::test_support::helpers::{seed_campaign_input, seed_company, test_service};

    #[tokio::test]
    async fn create_defaults_to_draft_in_eur() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = seed_campaign_input(&svc, &company.id).await;

        let campaign = svc.create_campaign(&company.id, &input).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert_eq!(campaign.currency, "EUR");

        let fetched = svc.get_campaign(&campaign.id).await.unwrap();
        assert_eq!(fetched, campaign);
    }

    #[tokio::test]
    async fn end_before_start_is_rejected() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = CampaignInput {
            end_date: NaiveDate::from_ymd_opt(2026, 2, 1),
            ..seed_campaign_input(&svc, &company.id).await
        };
        let err = svc.create_campaign(&company.id, &input).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(ref issues) if issues[0].field == "end_date"));
    }

    #[tokio::test]
    async fn group_of_other_company_is_rejected() {
        let svc = test_service().await;
        let acme = seed_company(&svc, "acme").await;
        let globex = seed_company(&svc, "globex").await;
        let foreign = seed_campaign_input(&svc, &globex.id).await;
        let own = seed_campaign_input(&svc, &acme.id).await;

        let input = CampaignInput {
            beneficiary_group_id: foreign.beneficiary_group_id,
            ..own
        };
        assert!(matches!(
            svc.create_campaign(&acme.id, &input).await,
            Err(DatabaseError::TenantMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn inactive_group_is_rejected() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = seed_campaign_input(&svc, &company.id).await;
        svc.deactivate_beneficiary_group(&input.beneficiary_group_id)
            .await
            .unwrap();
        assert!(matches!(
            svc.create_campaign(&company.id, &input).await,
            Err(DatabaseError::Validation(_))
        ));
    }

    #[rstest]
    #[case(&[CampaignStatus::Planned, CampaignStatus::Active, CampaignStatus::Completed], true)]
    #[case(&[CampaignStatus::Planned, CampaignStatus::Recruiting, CampaignStatus::Active], true)]
    #[case(&[CampaignStatus::Active], false)]
    #[case(&[CampaignStatus::Planned, CampaignStatus::Completed], false)]
    #[case(&[CampaignStatus::Closed, CampaignStatus::Draft], false)]
    #[tokio::test]
    async fn transitions_follow_lifecycle(#[case] path: &[CampaignStatus], #[case] ok: bool) {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = seed_campaign_input(&svc, &company.id).await;
        let campaign = svc.create_campaign(&company.id, &input).await.unwrap();

        let mut result = Ok(campaign.clone());
        for status in path {
            result = svc.transition_campaign(&campaign.id, *status, None).await;
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.is_ok(), ok);
        if !ok {
            assert!(matches!(result, Err(DatabaseError::InvalidState(_))));
        }
    }

    #[tokio::test]
    async fn transition_records_detail() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = seed_campaign_input(&svc, &company.id).await;
        let campaign = svc.create_campaign(&company.id, &input).await.unwrap();
        svc.transition_campaign(&campaign.id, CampaignStatus::Planned, Some("budget approved"))
            .await
            .unwrap();

        let mut filter =
            AuditFilter::for_company(&company.id).resource(ResourceType::Campaign, &campaign.id);
        filter.action = Some(AuditAction::StatusChanged);
        let entries = svc.query_audit(&filter).await.unwrap();
        assert_eq!(entries.len(), 1);
        let detail: StatusChangedDetail =
            serde_json::from_value(entries[0].after_state.clone().unwrap()).unwrap();
        assert_eq!(detail.from, "draft");
        assert_eq!(detail.to, "planned");
        assert_eq!(detail.reason.as_deref(), Some("budget approved"));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = seed_campaign_input(&svc, &company.id).await;
        let first = svc.create_campaign(&company.id, &input).await.unwrap();
        svc.create_campaign(&company.id, &input).await.unwrap();
        svc.transition_campaign(&first.id, CampaignStatus::Planned, None)
            .await
            .unwrap();

        assert_eq!(svc.list_campaigns(&company.id, None).await.unwrap().len(), 2);
        let planned = svc
            .list_campaigns(&company.id, Some(CampaignStatus::Planned))
            .await
            .unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].id, first.id);
    }
}
