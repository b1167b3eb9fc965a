//! Typed shapes of JSON-valued columns.
//!
//! The database stores these as TEXT. Repositories serialize on write and
//! deserialize on read, and `csr-schema` exports their JSON Schemas so the
//! API layer can validate payloads before they reach storage.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{ProgramType, SubscriptionPlan, UserRole};

/// Configuration of a program template or instance.
///
/// Every field is optional so a template can carry partial defaults that an
/// instance overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct ProgramConfig {
    pub session_length_minutes: Option<u32>,
    pub sessions_per_week: Option<u32>,
    pub duration_weeks: Option<u32>,
    /// ISO 639-1 codes the program is delivered in.
    pub languages: Vec<String>,
    /// `online`, `in_person`, or `hybrid`.
    pub delivery_mode: Option<String>,
    pub skills: Vec<String>,
    pub max_participants_per_volunteer: Option<u32>,
}

impl ProgramConfig {
    /// Fill unset fields from `defaults`. Set fields and non-empty lists win.
    #[must_use]
    pub fn merged_over(self, defaults: &Self) -> Self {
        Self {
            session_length_minutes: self
                .session_length_minutes
                .or(defaults.session_length_minutes),
            sessions_per_week: self.sessions_per_week.or(defaults.sessions_per_week),
            duration_weeks: self.duration_weeks.or(defaults.duration_weeks),
            languages: if self.languages.is_empty() {
                defaults.languages.clone()
            } else {
                self.languages
            },
            delivery_mode: self.delivery_mode.or_else(|| defaults.delivery_mode.clone()),
            skills: if self.skills.is_empty() {
                defaults.skills.clone()
            } else {
                self.skills
            },
            max_participants_per_volunteer: self
                .max_participants_per_volunteer
                .or(defaults.max_participants_per_volunteer),
        }
    }
}

/// Attribute conditions attached to an entitlement policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConditions {
    pub min_plan: Option<SubscriptionPlan>,
    pub allowed_roles: Vec<UserRole>,
    pub max_seats: Option<u32>,
    /// Free-form attribute equality constraints, e.g. `{"region": "eu"}`.
    pub attributes: BTreeMap<String, String>,
}

/// Inputs to a what-if scenario, expressed as deltas against the baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ScenarioParameters {
    pub volunteer_hours_delta_pct: f64,
    pub participant_delta_pct: f64,
    /// Monetary value of one volunteer hour, in the company's currency.
    pub hourly_value: Option<f64>,
    /// Restrict the scenario to these program types. Empty means all.
    pub program_types: Vec<ProgramType>,
}

/// Projection written back by the scenario engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ScenarioResult {
    pub projected_sroi: Option<f64>,
    pub projected_vis: Option<f64>,
    pub projected_volunteer_hours: f64,
    pub projected_participants: i64,
    pub notes: Option<String>,
}

/// Non-evidential context stored next to a ledger entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerMetadata {
    pub source_system: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub byte_size: Option<u64>,
    pub notes: Option<String>,
}

/// `detail` payload of a status change in `audit_logs.after_state`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct StatusChangedDetail {
    pub from: String,
    pub to: String,
    pub reason: Option<String>,
}

/// `detail` payload of a ledger verify run in `ledger_audit_log`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct VerifyDetail {
    pub entries_checked: u64,
    pub violations: Vec<String>,
    pub content_recomputed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn program_config_merge_prefers_instance_values() {
        let defaults = ProgramConfig {
            session_length_minutes: Some(60),
            sessions_per_week: Some(1),
            languages: vec!["de".into()],
            delivery_mode: Some("online".into()),
            ..ProgramConfig::default()
        };
        let instance = ProgramConfig {
            sessions_per_week: Some(2),
            languages: vec!["uk".into(), "en".into()],
            ..ProgramConfig::default()
        };

        let merged = instance.merged_over(&defaults);
        assert_eq!(merged.session_length_minutes, Some(60));
        assert_eq!(merged.sessions_per_week, Some(2));
        assert_eq!(merged.languages, vec!["uk".to_string(), "en".to_string()]);
        assert_eq!(merged.delivery_mode.as_deref(), Some("online"));
    }

    #[test]
    fn program_config_tolerates_missing_fields() {
        let config: ProgramConfig = serde_json::from_str(r#"{"duration_weeks": 12}"#).unwrap();
        assert_eq!(config.duration_weeks, Some(12));
        assert!(config.languages.is_empty());
    }

    #[test]
    fn policy_conditions_roundtrip() {
        let mut attributes = BTreeMap::new();
        attributes.insert("region".to_string(), "eu".to_string());
        let conditions = PolicyConditions {
            min_plan: Some(SubscriptionPlan::Professional),
            allowed_roles: vec![UserRole::Admin, UserRole::Manager],
            max_seats: None,
            attributes,
        };
        let json = serde_json::to_string(&conditions).unwrap();
        let recovered: PolicyConditions = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, conditions);
    }
}
