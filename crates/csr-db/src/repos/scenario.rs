//! What-if scenario planning.

use chrono::{NaiveDate, Utc};

use csr_core::entities::Scenario;
use csr_core::enums::{AuditAction, ResourceType, ScenarioStatus};
use csr_core::ids::PREFIX_SCENARIO;
use csr_core::shapes::{ScenarioParameters, ScenarioResult, StatusChangedDetail};
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_date, parse_datetime, parse_enum, parse_json,
    parse_optional_typed_json, to_json_text,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, name, description, baseline_period_start,
     baseline_period_end, parameters, result, status, created_by, created_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fields supplied when creating a scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioInput {
    pub name: String,
    pub description: Option<String>,
    pub baseline_period_start: NaiveDate,
    pub baseline_period_end: NaiveDate,
    pub parameters: ScenarioParameters,
}

impl ScenarioInput {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::new("name", "must not be empty"));
        }
        if self.baseline_period_end < self.baseline_period_start {
            issues.push(ValidationIssue::new(
                "baseline_period_end",
                "must not be before baseline_period_start",
            ));
        }
        let p = &self.parameters;
        for (field, pct) in [
            ("parameters.volunteer_hours_delta_pct", p.volunteer_hours_delta_pct),
            ("parameters.participant_delta_pct", p.participant_delta_pct),
        ] {
            if !pct.is_finite() || pct < -100.0 {
                issues.push(ValidationIssue::new(field, "must be a number of at least -100"));
            }
        }
        if p.hourly_value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            issues.push(ValidationIssue::new(
                "parameters.hourly_value",
                "must not be negative",
            ));
        }
        issues
    }
}

fn result_issues(result: &ScenarioResult) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if !result.projected_volunteer_hours.is_finite() || result.projected_volunteer_hours < 0.0 {
        issues.push(ValidationIssue::new(
            "projected_volunteer_hours",
            "must not be negative",
        ));
    }
    if result.projected_participants < 0 {
        issues.push(ValidationIssue::new(
            "projected_participants",
            "must not be negative",
        ));
    }
    if result
        .projected_vis
        .is_some_and(|v| !(0.0..=100.0).contains(&v))
    {
        issues.push(ValidationIssue::new("projected_vis", "must be between 0 and 100"));
    }
    issues
}

fn row_to_scenario(row: &libsql::Row) -> Result<Scenario, DatabaseError> {
    Ok(Scenario {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        name: row.get::<String>(2)?,
        description: get_opt_string(row, 3)?,
        baseline_period_start: parse_date(&row.get::<String>(4)?)?,
        baseline_period_end: parse_date(&row.get::<String>(5)?)?,
        parameters: parse_json(&row.get::<String>(6)?)?,
        result: parse_optional_typed_json(get_opt_string(row, 7)?.as_deref())?,
        status: parse_enum(&row.get::<String>(8)?)?,
        created_by: get_opt_string(row, 9)?,
        created_at: parse_datetime(&row.get::<String>(10)?)?,
        updated_at: parse_datetime(&row.get::<String>(11)?)?,
    })
}

impl CsrService {
    /// Create a draft scenario.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` for an inverted baseline period or
    /// out-of-range parameters.
    pub async fn create_scenario(
        &self,
        company_id: &str,
        input: &ScenarioInput,
    ) -> Result<Scenario, DatabaseError> {
        self.check_tenant(company_id)?;
        let issues = input.issues();
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_SCENARIO).await?;
        let created_by = self.actor().map(|a| a.user_id.clone());
        let name = input.name.trim().to_string();
        let parameters = to_json_text(&input.parameters)?;
        let start = input.baseline_period_start.format(DATE_FORMAT).to_string();
        let end = input.baseline_period_end.format(DATE_FORMAT).to_string();

        self.db()
            .execute_with(
                "INSERT INTO scenarios (id, company_id, name, description, baseline_period_start,
                     baseline_period_end, parameters, status, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft', ?8, ?9, ?9)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        name.as_str(),
                        input.description.as_deref(),
                        start.as_str(),
                        end.as_str(),
                        parameters.as_str(),
                        created_by.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let scenario = Scenario {
            id: id.clone(),
            company_id: company_id.to_string(),
            name,
            description: input.description.clone(),
            baseline_period_start: input.baseline_period_start,
            baseline_period_end: input.baseline_period_end,
            parameters: input.parameters.clone(),
            result: None,
            status: ScenarioStatus::Draft,
            created_by,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::Scenario,
            &id,
            None,
            Some(serde_json::to_value(&scenario)?),
        )
        .await?;

        Ok(scenario)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the scenario does not exist.
    pub async fn get_scenario(&self, id: &str) -> Result<Scenario, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(&format!("SELECT {SELECT_COLS} FROM scenarios WHERE id = ?1"), || [id])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let scenario = row_to_scenario(&row)?;
        self.check_tenant(&scenario.company_id)?;
        Ok(scenario)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_scenarios(
        &self,
        company_id: &str,
        status: Option<ScenarioStatus>,
    ) -> Result<Vec<Scenario>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM scenarios
                     WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY julianday(updated_at) DESC, rowid DESC"
                ),
                || libsql::params![company_id, status.map(ScenarioStatus::as_str)],
            )
            .await?;
        collect_rows(rows, row_to_scenario).await
    }

    /// Store a computed projection. Recomputing replaces the previous result.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` for an archived scenario.
    pub async fn store_scenario_result(
        &self,
        id: &str,
        result: &ScenarioResult,
    ) -> Result<Scenario, DatabaseError> {
        let issues = result_issues(result);
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }
        let current = self.get_scenario(id).await?;
        self.move_scenario(current, ScenarioStatus::Computed, Some(result))
            .await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the scenario is already archived.
    pub async fn archive_scenario(&self, id: &str) -> Result<Scenario, DatabaseError> {
        let current = self.get_scenario(id).await?;
        self.move_scenario(current, ScenarioStatus::Archived, None)
            .await
    }

    async fn move_scenario(
        &self,
        current: Scenario,
        to: ScenarioStatus,
        result: Option<&ScenarioResult>,
    ) -> Result<Scenario, DatabaseError> {
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition scenario {} from {} to {to}",
                current.id, current.status
            )));
        }

        let now = Utc::now();
        let result = match result {
            Some(r) => Some(r.clone()),
            None => current.result.clone(),
        };
        let result_text = result.as_ref().map(to_json_text).transpose()?;
        self.db()
            .execute_with(
                "UPDATE scenarios SET status = ?1, result = ?2, updated_at = ?3 WHERE id = ?4",
                || {
                    libsql::params![
                        to.as_str(),
                        result_text.as_deref(),
                        now.to_rfc3339(),
                        current.id.as_str()
                    ]
                },
            )
            .await?;

        if current.status != to {
            let detail = StatusChangedDetail {
                from: current.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: None,
            };
            self.record_audit(
                &current.company_id,
                AuditAction::StatusChanged,
                ResourceType::Scenario,
                &current.id,
                None,
                Some(serde_json::to_value(&detail)?),
            )
            .await?;
        } else {
            self.record_audit(
                &current.company_id,
                AuditAction::Updated,
                ResourceType::Scenario,
                &current.id,
                current.result.as_ref().map(serde_json::to_value).transpose()?,
                result.as_ref().map(serde_json::to_value).transpose()?,
            )
            .await?;
        }

        Ok(Scenario {
            status: to,
            result,
            updated_at: now,
            ..current
        })
    }
}
