use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{PolicyEffect, PolicySubjectType, SubscriptionPlan, SubscriptionStatus};
use crate::shapes::PolicyConditions;

/// A company's billing subscription. One per company.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub company_id: String,
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub seats: i64,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    /// Customer id at the payment provider.
    pub external_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An entitlement (ABAC) policy row. Evaluation happens outside this crate;
/// rows are only stored and listed here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EntitlementPolicy {
    pub id: String,
    pub company_id: String,
    /// Feature key, e.g. `reports.export`.
    pub feature: String,
    pub subject_type: PolicySubjectType,
    pub subject_value: String,
    pub effect: PolicyEffect,
    pub conditions: Option<PolicyConditions>,
    /// Higher wins when several policies match.
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
