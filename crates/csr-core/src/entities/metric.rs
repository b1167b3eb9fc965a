use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stored SROI / VIS figures for one period, company-wide when
/// `program_instance_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MetricSnapshot {
    pub id: String,
    pub company_id: String,
    pub program_instance_id: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub sroi_ratio: Option<f64>,
    pub vis_score: Option<f64>,
    pub volunteer_hours: f64,
    pub participants: i64,
    pub computed_at: DateTime<Utc>,
}
