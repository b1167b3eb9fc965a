use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{BeneficiaryGroupType, CampaignStatus, InstanceStatus, ProgramType};
use crate::shapes::ProgramConfig;

/// A reusable program blueprint. `company_id == None` marks a global template
/// offered to every tenant.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ProgramTemplate {
    pub id: String,
    pub company_id: Option<String>,
    pub name: String,
    pub program_type: ProgramType,
    pub description: Option<String>,
    pub default_config: ProgramConfig,
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A population a company serves through its programs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BeneficiaryGroup {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub group_type: BeneficiaryGroupType,
    pub country_code: String,
    pub region: Option<String>,
    pub age_range_min: Option<i64>,
    pub age_range_max: Option<i64>,
    pub min_group_size: Option<i64>,
    pub max_group_size: Option<i64>,
    /// ISO 639-1 codes.
    pub primary_languages: Vec<String>,
    pub tags: Vec<String>,
    pub internal_notes: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A campaign: one template offered to one beneficiary group over a period.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub company_id: String,
    pub template_id: String,
    pub beneficiary_group_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub target_volunteers: i64,
    pub target_beneficiaries: i64,
    pub budget_allocated: Option<f64>,
    /// ISO 4217.
    pub currency: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A concrete run of a campaign's program, with stored outcome scores.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProgramInstance {
    pub id: String,
    pub campaign_id: String,
    pub company_id: String,
    pub template_id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub config: ProgramConfig,
    pub enrolled_volunteers: i64,
    pub enrolled_beneficiaries: i64,
    pub total_hours: f64,
    pub sroi_score: Option<f64>,
    pub vis_score: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
