//! Program instance repository.
//!
//! An instance inherits its template through its campaign. Its stored config
//! is the caller's override merged over the template default at creation
//! time, so later template edits do not change running instances.

use chrono::Utc;

use csr_core::entities::ProgramInstance;
use csr_core::enums::{AuditAction, CampaignStatus, InstanceStatus, ResourceType};
use csr_core::ids::PREFIX_INSTANCE;
use csr_core::shapes::{ProgramConfig, StatusChangedDetail};
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_json, parse_optional_datetime,
    to_json_text,
};
use crate::service::CsrService;
use crate::updates::outcomes::InstanceOutcomes;

const SELECT_COLS: &str = "id, campaign_id, company_id, template_id, name, status, config,
     enrolled_volunteers, enrolled_beneficiaries, total_hours, sroi_score, vis_score,
     started_at, ended_at, created_at, updated_at";

fn row_to_instance(row: &libsql::Row) -> Result<ProgramInstance, DatabaseError> {
    Ok(ProgramInstance {
        id: row.get::<String>(0)?,
        campaign_id: row.get::<String>(1)?,
        company_id: row.get::<String>(2)?,
        template_id: row.get::<String>(3)?,
        name: row.get::<String>(4)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        config: parse_json(&row.get::<String>(6)?)?,
        enrolled_volunteers: row.get::<i64>(7)?,
        enrolled_beneficiaries: row.get::<i64>(8)?,
        total_hours: row.get::<f64>(9)?,
        sroi_score: row.get::<Option<f64>>(10)?,
        vis_score: row.get::<Option<f64>>(11)?,
        started_at: parse_optional_datetime(get_opt_string(row, 12)?.as_deref())?,
        ended_at: parse_optional_datetime(get_opt_string(row, 13)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(14)?)?,
        updated_at: parse_datetime(&row.get::<String>(15)?)?,
    })
}

fn outcome_issues(outcomes: &InstanceOutcomes) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if outcomes.enrolled_volunteers.is_some_and(|n| n < 0) {
        issues.push(ValidationIssue::new("enrolled_volunteers", "must not be negative"));
    }
    if outcomes.enrolled_beneficiaries.is_some_and(|n| n < 0) {
        issues.push(ValidationIssue::new(
            "enrolled_beneficiaries",
            "must not be negative",
        ));
    }
    if outcomes.total_hours.is_some_and(|h| !h.is_finite() || h < 0.0) {
        issues.push(ValidationIssue::new("total_hours", "must be a non-negative number"));
    }
    if let Some(Some(sroi)) = outcomes.sroi_score {
        if !sroi.is_finite() {
            issues.push(ValidationIssue::new("sroi_score", "must be a finite number"));
        }
    }
    if let Some(Some(vis)) = outcomes.vis_score {
        if !(0.0..=100.0).contains(&vis) {
            issues.push(ValidationIssue::new("vis_score", "must be between 0 and 100"));
        }
    }
    issues
}

impl CsrService {
    /// Start a planned run of a campaign. `config_override` is merged over the
    /// template's default config.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` when the campaign is completed or
    /// closed.
    pub async fn create_program_instance(
        &self,
        campaign_id: &str,
        name: &str,
        config_override: Option<ProgramConfig>,
    ) -> Result<ProgramInstance, DatabaseError> {
        let campaign = self.get_campaign(campaign_id).await?;
        if matches!(
            campaign.status,
            CampaignStatus::Completed | CampaignStatus::Closed
        ) {
            return Err(DatabaseError::InvalidState(format!(
                "campaign {campaign_id} is {} and accepts no new instances",
                campaign.status
            )));
        }
        if name.trim().is_empty() {
            return Err(DatabaseError::Validation(vec![ValidationIssue::new(
                "name",
                "must not be empty",
            )]));
        }

        let template = self.get_template(&campaign.template_id).await?;
        let config = config_override
            .unwrap_or_default()
            .merged_over(&template.default_config);
        let config_text = to_json_text(&config)?;

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_INSTANCE).await?;
        let name = name.trim().to_string();

        self.db()
            .execute_with(
                "INSERT INTO program_instances (id, campaign_id, company_id, template_id, name,
                     status, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'planned', ?6, ?7, ?7)",
                || {
                    libsql::params![
                        id.as_str(),
                        campaign_id,
                        campaign.company_id.as_str(),
                        campaign.template_id.as_str(),
                        name.as_str(),
                        config_text.as_str(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let instance = ProgramInstance {
            id: id.clone(),
            campaign_id: campaign_id.to_string(),
            company_id: campaign.company_id.clone(),
            template_id: campaign.template_id.clone(),
            name,
            status: InstanceStatus::Planned,
            config,
            enrolled_volunteers: 0,
            enrolled_beneficiaries: 0,
            total_hours: 0.0,
            sroi_score: None,
            vis_score: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            &campaign.company_id,
            AuditAction::Created,
            ResourceType::ProgramInstance,
            &id,
            None,
            Some(serde_json::to_value(&instance)?),
        )
        .await?;

        Ok(instance)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the instance does not exist.
    pub async fn get_program_instance(&self, id: &str) -> Result<ProgramInstance, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM program_instances WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let instance = row_to_instance(&row)?;
        self.check_tenant(&instance.company_id)?;
        Ok(instance)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the campaign is unknown or the query fails.
    pub async fn list_instances_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<ProgramInstance>, DatabaseError> {
        self.get_campaign(campaign_id).await?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM program_instances
                     WHERE campaign_id = ?1 ORDER BY created_at, rowid"
                ),
                || [campaign_id],
            )
            .await?;
        collect_rows(rows, row_to_instance).await
    }

    /// Move an instance along its lifecycle. The first activation stamps
    /// `started_at`; completion stamps `ended_at`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the transition is not allowed.
    pub async fn transition_program_instance(
        &self,
        id: &str,
        to: InstanceStatus,
        reason: Option<&str>,
    ) -> Result<ProgramInstance, DatabaseError> {
        let current = self.get_program_instance(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition program instance {id} from {} to {to}",
                current.status
            )));
        }

        let now = Utc::now();
        let started_at = match (to, current.started_at) {
            (InstanceStatus::Active, None) => Some(now),
            (_, started) => started,
        };
        let ended_at = if to == InstanceStatus::Completed {
            Some(now)
        } else {
            current.ended_at
        };

        self.db()
            .execute_with(
                "UPDATE program_instances
                 SET status = ?1, started_at = ?2, ended_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                || {
                    libsql::params![
                        to.as_str(),
                        started_at.map(|t| t.to_rfc3339()),
                        ended_at.map(|t| t.to_rfc3339()),
                        now.to_rfc3339(),
                        id
                    ]
                },
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
            ResourceType::ProgramInstance,
            id,
            None,
            Some(serde_json::to_value(&detail)?),
        )
        .await?;

        Ok(ProgramInstance {
            status: to,
            started_at,
            ended_at,
            updated_at: now,
            ..current
        })
    }

    /// Store enrolment counts, hours and the externally computed SROI / VIS
    /// scores. Only fields set on `outcomes` are written.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` for negative counts or hours, or a
    /// VIS score outside `0..=100`.
    pub async fn record_outcomes(
        &self,
        id: &str,
        outcomes: &InstanceOutcomes,
    ) -> Result<ProgramInstance, DatabaseError> {
        let current = self.get_program_instance(id).await?;
        if outcomes.is_empty() {
            return Ok(current);
        }
        let issues = outcome_issues(outcomes);
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }

        let mut sets = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        let mut idx = 1;

        if let Some(count) = outcomes.enrolled_volunteers {
            sets.push(format!("enrolled_volunteers = ?{idx}"));
            params.push(count.into());
            idx += 1;
        }
        if let Some(count) = outcomes.enrolled_beneficiaries {
            sets.push(format!("enrolled_beneficiaries = ?{idx}"));
            params.push(count.into());
            idx += 1;
        }
        if let Some(hours) = outcomes.total_hours {
            sets.push(format!("total_hours = ?{idx}"));
            params.push(hours.into());
            idx += 1;
        }
        if let Some(sroi) = outcomes.sroi_score {
            sets.push(format!("sroi_score = ?{idx}"));
            params.push(sroi.into());
            idx += 1;
        }
        if let Some(vis) = outcomes.vis_score {
            sets.push(format!("vis_score = ?{idx}"));
            params.push(vis.into());
            idx += 1;
        }

        sets.push(format!("updated_at = ?{idx}"));
        params.push(Utc::now().to_rfc3339().into());
        idx += 1;
        params.push(id.into());

        let sql = format!(
            "UPDATE program_instances SET {} WHERE id = ?{idx}",
            sets.join(", ")
        );
        self.db()
            .execute_with(&sql, || libsql::params_from_iter(params.clone()))
            .await?;

        let instance = self.get_program_instance(id).await?;

        self.record_audit(
            &instance.company_id,
            AuditAction::Updated,
            ResourceType::ProgramInstance,
            id,
            None,
            Some(serde_json::to_value(outcomes)?),
        )
        .await?;

        Ok(instance)
    }
}
