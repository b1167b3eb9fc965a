use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::ScenarioStatus;
use crate::shapes::{ScenarioParameters, ScenarioResult};

/// A what-if planning scenario. The projection itself is computed elsewhere
/// and stored back through `store_scenario_result`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub baseline_period_start: NaiveDate,
    pub baseline_period_end: NaiveDate,
    pub parameters: ScenarioParameters,
    pub result: Option<ScenarioResult>,
    pub status: ScenarioStatus,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
