//! SROI / VIS metric snapshots.

use chrono::{NaiveDate, Utc};

use csr_core::entities::MetricSnapshot;
use csr_core::ids::PREFIX_METRIC;
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{collect_rows, get_opt_string, parse_date, parse_datetime};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, program_instance_id, period_start, period_end,
     sroi_ratio, vis_score, volunteer_hours, participants, computed_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Figures for one reporting period.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInput {
    /// `None` for a company-wide snapshot.
    pub program_instance_id: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub sroi_ratio: Option<f64>,
    pub vis_score: Option<f64>,
    pub volunteer_hours: f64,
    pub participants: i64,
}

impl SnapshotInput {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.period_end < self.period_start {
            issues.push(ValidationIssue::new(
                "period_end",
                "must not be before period_start",
            ));
        }
        if self.sroi_ratio.is_some_and(|r| !r.is_finite()) {
            issues.push(ValidationIssue::new("sroi_ratio", "must be finite"));
        }
        if self.vis_score.is_some_and(|v| !(0.0..=100.0).contains(&v)) {
            issues.push(ValidationIssue::new("vis_score", "must be between 0 and 100"));
        }
        if !self.volunteer_hours.is_finite() || self.volunteer_hours < 0.0 {
            issues.push(ValidationIssue::new("volunteer_hours", "must not be negative"));
        }
        if self.participants < 0 {
            issues.push(ValidationIssue::new("participants", "must not be negative"));
        }
        issues
    }
}

fn row_to_snapshot(row: &libsql::Row) -> Result<MetricSnapshot, DatabaseError> {
    Ok(MetricSnapshot {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        program_instance_id: get_opt_string(row, 2)?,
        period_start: parse_date(&row.get::<String>(3)?)?,
        period_end: parse_date(&row.get::<String>(4)?)?,
        sroi_ratio: row.get::<Option<f64>>(5)?,
        vis_score: row.get::<Option<f64>>(6)?,
        volunteer_hours: row.get::<f64>(7)?,
        participants: row.get::<i64>(8)?,
        computed_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

impl CsrService {
    /// Store computed figures for a period.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` for out-of-range figures and
    /// `TenantMismatch` when the instance belongs to another company.
    pub async fn record_metric_snapshot(
        &self,
        company_id: &str,
        input: &SnapshotInput,
    ) -> Result<MetricSnapshot, DatabaseError> {
        self.check_tenant(company_id)?;
        let issues = input.issues();
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }
        if let Some(ref instance_id) = input.program_instance_id {
            let instance = self.get_program_instance(instance_id).await?;
            if instance.company_id != company_id {
                return Err(DatabaseError::TenantMismatch {
                    actor_company: company_id.to_string(),
                    company: instance.company_id,
                });
            }
        }

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_METRIC).await?;
        let start = input.period_start.format(DATE_FORMAT).to_string();
        let end = input.period_end.format(DATE_FORMAT).to_string();

        self.db()
            .execute_with(
                "INSERT INTO metric_snapshots (id, company_id, program_instance_id, period_start,
                     period_end, sroi_ratio, vis_score, volunteer_hours, participants, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        input.program_instance_id.as_deref(),
                        start.as_str(),
                        end.as_str(),
                        input.sroi_ratio,
                        input.vis_score,
                        input.volunteer_hours,
                        input.participants,
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        tracing::debug!(%id, company_id, "metric snapshot recorded");

        Ok(MetricSnapshot {
            id,
            company_id: company_id.to_string(),
            program_instance_id: input.program_instance_id.clone(),
            period_start: input.period_start,
            period_end: input.period_end,
            sroi_ratio: input.sroi_ratio,
            vis_score: input.vis_score,
            volunteer_hours: input.volunteer_hours,
            participants: input.participants,
            computed_at: now,
        })
    }

    /// Snapshots whose period overlaps `[from, to]`, oldest period first.
    /// With `instance_id` set only that instance's snapshots are returned,
    /// otherwise company-wide and per-instance snapshots alike.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_metric_snapshots(
        &self,
        company_id: &str,
        instance_id: Option<&str>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<MetricSnapshot>, DatabaseError> {
        self.check_tenant(company_id)?;
        let from = from.map(|d| d.format(DATE_FORMAT).to_string());
        let to = to.map(|d| d.format(DATE_FORMAT).to_string());
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM metric_snapshots
                     WHERE company_id = ?1
                       AND (?2 IS NULL OR program_instance_id = ?2)
                       AND (?3 IS NULL OR period_end >= ?3)
                       AND (?4 IS NULL OR period_start <= ?4)
                     ORDER BY period_start, julianday(computed_at)"
                ),
                || libsql::params![company_id, instance_id, from.as_deref(), to.as_deref()],
            )
            .await?;
        collect_rows(rows, row_to_snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::test_support::helpers::{seed_campaign_input, seed_company, test_service};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quarter(instance: Option<&str>, start: NaiveDate, end: NaiveDate) -> SnapshotInput {
        SnapshotInput {
            program_instance_id: instance.map(String::from),
            period_start: start,
            period_end: end,
            sroi_ratio: Some(2.8),
            vis_score: Some(64.0),
            volunteer_hours: 320.5,
            participants: 48,
        }
    }

    #[tokio::test]
    async fn list_filters_by_instance_and_period() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let input = seed_campaign_input(&svc, &company.id).await;
        let campaign = svc.create_campaign(&company.id, &input).await.unwrap();
        let instance = svc
            .create_program_instance(&campaign.id, "Cohort A", None)
            .await
            .unwrap();

        let q1 = svc
            .record_metric_snapshot(&company.id, &quarter(None, date(2026, 1, 1), date(2026, 3, 31)))
            .await
            .unwrap();
        let q2 = svc
            .record_metric_snapshot(
                &company.id,
                &quarter(Some(&instance.id), date(2026, 4, 1), date(2026, 6, 30)),
            )
            .await
            .unwrap();

        let all = svc
            .list_metric_snapshots(&company.id, None, None, None)
            .await
            .unwrap();
        assert_eq!(all, vec![q1.clone(), q2.clone()]);

        let per_instance = svc
            .list_metric_snapshots(&company.id, Some(&instance.id), None, None)
            .await
            .unwrap();
        assert_eq!(per_instance, vec![q2]);

        let march = svc
            .list_metric_snapshots(&company.id, None, Some(date(2026, 3, 1)), Some(date(2026, 3, 31)))
            .await
            .unwrap();
        assert_eq!(march, vec![q1]);
    }

    #[tokio::test]
    async fn out_of_range_vis_is_rejected() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let bad = SnapshotInput {
            vis_score: Some(140.0),
            ..quarter(None, date(2026, 1, 1), date(2026, 3, 31))
        };
        let err = svc.record_metric_snapshot(&company.id, &bad).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(ref issues) if issues[0].field == "vis_score"));
    }

    #[tokio::test]
    async fn instance_of_other_company_is_rejected() {
        let svc = test_service().await;
        let acme = seed_company(&svc, "acme").await;
        let globex = seed_company(&svc, "globex").await;
        let input = seed_campaign_input(&svc, &acme.id).await;
        let campaign = svc.create_campaign(&acme.id, &input).await.unwrap();
        let instance = svc
            .create_program_instance(&campaign.id, "Cohort A", None)
            .await
            .unwrap();

        let err = svc
            .record_metric_snapshot(
                &globex.id,
                &quarter(Some(&instance.id), date(2026, 1, 1), date(2026, 3, 31)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TenantMismatch { .. }));
    }
}
