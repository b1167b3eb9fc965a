use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::CompanyStatus;

/// A tenant. Almost every other row is scoped by `company_id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Company {
    pub id: String,
    pub name: String,
    /// URL-safe unique handle, e.g. `acme-gmbh`.
    pub slug: String,
    pub industry: Option<String>,
    /// ISO 3166-1 alpha-2.
    pub country_code: Option<String>,
    pub status: CompanyStatus,
    pub settings: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
