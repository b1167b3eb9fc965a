//! Central schema registry for all CSR types.
//!
//! The `SchemaRegistry` builds JSON Schemas from csr-core types at construction
//! time using [`schemars::schema_for!`] and provides validation via `jsonschema`.

use std::collections::HashMap;

use csr_core::validation::Validate;
use schemars::schema_for;
use serde::de::DeserializeOwned;

use crate::error::SchemaError;

/// Central store of all JSON Schemas in the CSR system.
///
/// Built from csr-core types via [`schemars::schema_for!`]. Provides lookup
/// by name and validation of arbitrary JSON values against registered schemas.
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, serde_json::Value>,
}

/// Insert a schema into the map, converting the `schemars` output to a
/// `serde_json::Value`. Panics if `serde_json::to_value` fails (should be
/// infallible for valid `schemars` output).
macro_rules! register {
    ($map:expr, $name:expr, $ty:ty) => {
        $map.insert($name, serde_json::to_value(schema_for!($ty)).unwrap());
    };
}

impl SchemaRegistry {
    /// Build a new registry containing all entity, JSON-column shape, input,
    /// and ledger report schemas from csr-core.
    ///
    /// # Panics
    ///
    /// Panics if `serde_json::to_value` fails on any `schemars`-generated
    /// schema. This is not expected in practice because `schemars` always
    /// produces valid JSON-serialisable output.
    #[must_use]
    pub fn new() -> Self {
        use csr_core::entities as e;
        use csr_core::shapes as s;

        let mut schemas = HashMap::new();

        // --- Tables (24) ---
        register!(schemas, "company", e::Company);
        register!(schemas, "user", e::User);
        register!(schemas, "audit_log_entry", e::AuditLogEntry);
        register!(schemas, "pii_vault_record", e::PiiVaultRecord);
        register!(schemas, "consent_record", e::ConsentRecord);
        register!(schemas, "subscription", e::Subscription);
        register!(schemas, "entitlement_policy", e::EntitlementPolicy);
        register!(schemas, "program_template", e::ProgramTemplate);
        register!(schemas, "beneficiary_group", e::BeneficiaryGroup);
        register!(schemas, "campaign", e::Campaign);
        register!(schemas, "program_instance", e::ProgramInstance);
        register!(schemas, "buddy_match", e::BuddyMatch);
        register!(schemas, "buddy_event", e::BuddyEvent);
        register!(schemas, "impact_delivery", e::ImpactDelivery);
        register!(schemas, "event_dedup_record", e::EventDedupRecord);
        register!(schemas, "api_request_record", e::ApiRequestRecord);
        register!(schemas, "nlq_query", e::NlqQuery);
        register!(schemas, "nlq_safety_check", e::NlqSafetyCheck);
        register!(schemas, "notification", e::Notification);
        register!(schemas, "publication", e::Publication);
        register!(schemas, "scenario", e::Scenario);
        register!(schemas, "metric_snapshot", e::MetricSnapshot);
        register!(schemas, "ledger_entry", e::LedgerEntry);
        register!(schemas, "ledger_audit_entry", e::LedgerAuditEntry);

        // --- JSON column shapes (7) ---
        register!(schemas, "program_config", s::ProgramConfig);
        register!(schemas, "policy_conditions", s::PolicyConditions);
        register!(schemas, "scenario_parameters", s::ScenarioParameters);
        register!(schemas, "scenario_result", s::ScenarioResult);
        register!(schemas, "ledger_metadata", s::LedgerMetadata);
        register!(schemas, "status_changed_detail", s::StatusChangedDetail);
        register!(schemas, "verify_detail", s::VerifyDetail);

        // --- API inputs (3) ---
        register!(schemas, "age_range", csr_core::validation::AgeRange);
        register!(
            schemas,
            "create_beneficiary_group",
            csr_core::validation::CreateBeneficiaryGroupInput
        );
        register!(
            schemas,
            "update_beneficiary_group",
            csr_core::validation::UpdateBeneficiaryGroupInput
        );

        // --- Ledger reports (1) ---
        register!(schemas, "chain_report", csr_core::ledger::ChainReport);

        Self { schemas }
    }

    /// Get a schema by name. Returns `None` if not found.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.schemas.get(name)
    }

    /// Validate a JSON value against a named schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::NotFound` if the schema name is unknown, or
    /// `SchemaError::ValidationFailed` if validation produces errors.
    pub fn validate(&self, name: &str, instance: &serde_json::Value) -> Result<(), SchemaError> {
        let schema = self
            .get(name)
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))?;

        let validator = jsonschema::validator_for(schema)
            .map_err(|e| SchemaError::Generation(format!("{e}")))?;

        let errors: Vec<String> = validator
            .iter_errors(instance)
            .map(|e| format!("{e}"))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::ValidationFailed { errors })
        }
    }

    /// Parse an API payload: JSON Schema first, then deserialization, then the
    /// type's [`Validate`] refinements.
    ///
    /// # Errors
    ///
    /// Returns the first failing layer: `ValidationFailed` for schema errors,
    /// `Deserialize` if the value does not fit `T`, `RefinementFailed` for
    /// cross-field and content rules.
    pub fn parse_validated<T>(&self, name: &str, value: serde_json::Value) -> Result<T, SchemaError>
    where
        T: DeserializeOwned + Validate,
    {
        self.validate(name, &value)?;
        let parsed: T = serde_json::from_value(value)?;
        let issues = parsed.issues();
        if issues.is_empty() {
            Ok(parsed)
        } else {
            Err(SchemaError::RefinementFailed { issues })
        }
    }

    /// List all registered schema names.
    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.schemas.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use csr_core::entities::Company;
    use csr_core::enums::{BeneficiaryGroupType, CompanyStatus};
    use csr_core::validation::{CreateBeneficiaryGroupInput, UpdateBeneficiaryGroupInput};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
    }

    #[test]
    fn registry_has_expected_count() {
        // 24 tables + 7 shapes + 3 inputs + 1 report = 35
        assert_eq!(registry().schema_count(), 35);
    }

    #[test]
    fn registry_list_is_sorted() {
        let names = registry().list();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn validate_valid_company() {
        let company = Company {
            id: "cmp-0000000000000001".into(),
            name: "Acme".into(),
            slug: "acme".into(),
            industry: None,
            country_code: Some("NO".into()),
            status: CompanyStatus::Active,
            settings: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&company).unwrap();
        assert!(registry().validate("company", &json).is_ok());
    }

    #[test]
    fn validate_rejects_invalid_enum() {
        let invalid = json!({
            "id": "cmp-1",
            "name": "Acme",
            "slug": "acme",
            "status": "bankrupt",
            "created_at": "2026-02-08T12:00:00Z",
            "updated_at": "2026-02-08T12:00:00Z"
        });
        assert!(registry().validate("company", &invalid).is_err());
    }

    #[test]
    fn validate_nonexistent_schema_returns_not_found() {
        let result = registry().validate("bogus", &json!({}));
        assert!(matches!(result, Err(SchemaError::NotFound(_))));
    }

    #[test]
    fn parse_validated_accepts_good_payload() {
        let payload = json!({
            "name": "Women in tech Nairobi",
            "group_type": "women",
            "country_code": "KE",
            "age_range": {"min": 18, "max": 40},
            "min_group_size": 6,
            "max_group_size": 15,
            "primary_languages": ["sw", "en"]
        });
        let parsed: CreateBeneficiaryGroupInput = registry()
            .parse_validated("create_beneficiary_group", payload)
            .unwrap();
        assert_eq!(parsed.group_type, BeneficiaryGroupType::Women);
        assert_eq!(parsed.max_group_size, Some(15));
    }

    #[test]
    fn parse_validated_reports_schema_errors_first() {
        let payload = json!({
            "name": "x",
            "group_type": "women",
            "country_code": "KE",
            "age_range": {"min": 10, "max": 500}
        });
        let result: Result<CreateBeneficiaryGroupInput, _> =
            registry().parse_validated("create_beneficiary_group", payload);
        assert!(matches!(result, Err(SchemaError::ValidationFailed { .. })));
    }

    #[test]
    fn parse_validated_runs_refinements() {
        let payload = json!({
            "name": "x",
            "group_type": "youth",
            "country_code": "KE",
            "age_range": {"min": 30, "max": 12},
            "min_group_size": 9,
            "max_group_size": 3,
            "description": "email lead@ngo.ke"
        });
        let result: Result<CreateBeneficiaryGroupInput, _> =
            registry().parse_validated("create_beneficiary_group", payload);
        let Err(SchemaError::RefinementFailed { issues }) = result else {
            panic!("expected RefinementFailed");
        };
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["description", "age_range", "min_group_size"]);
    }

    #[test]
    fn update_null_clears_and_absent_keeps() {
        let parsed: UpdateBeneficiaryGroupInput = registry()
            .parse_validated(
                "update_beneficiary_group",
                json!({ "description": null, "age_range": null, "region": "Mombasa" }),
            )
            .unwrap();
        assert_eq!(parsed.description, Some(None));
        assert_eq!(parsed.age_range, Some(None));
        assert_eq!(parsed.region, Some(Some("Mombasa".to_string())));
        assert_eq!(parsed.internal_notes, None);
        assert_eq!(parsed.min_group_size, None);
    }

    #[test]
    fn all_table_schemas_present() {
        let reg = registry();
        for name in [
            "company",
            "user",
            "audit_log_entry",
            "pii_vault_record",
            "consent_record",
            "subscription",
            "entitlement_policy",
            "program_template",
            "beneficiary_group",
            "campaign",
            "program_instance",
            "buddy_match",
            "buddy_event",
            "impact_delivery",
            "event_dedup_record",
            "api_request_record",
            "nlq_query",
            "nlq_safety_check",
            "notification",
            "publication",
            "scenario",
            "metric_snapshot",
            "ledger_entry",
            "ledger_audit_entry",
        ] {
            assert!(reg.get(name).is_some(), "Missing expected schema: {name}");
        }
    }
}
