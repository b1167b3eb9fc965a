use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{NlqStatus, SafetyCheck};

/// A natural-language query and what the NLQ engine did with it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NlqQuery {
    pub id: String,
    pub company_id: String,
    pub user_id: Option<String>,
    pub question: String,
    pub normalized_question: Option<String>,
    pub intent: Option<String>,
    pub generated_sql: Option<String>,
    /// `None` until safety checks have been recorded.
    pub safety_passed: Option<bool>,
    pub execution_time_ms: Option<i64>,
    pub result_row_count: Option<i64>,
    pub cache_hit: bool,
    pub status: NlqStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of one catalog check against one query's generated SQL.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NlqSafetyCheck {
    pub id: String,
    pub query_id: String,
    pub check: SafetyCheck,
    pub passed: bool,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
