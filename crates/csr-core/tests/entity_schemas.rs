//! Generated JSON Schemas accept real entities and enforce the declared input limits.

use chrono::{NaiveDate, Utc};
use schemars::schema_for;
use serde_json::json;

use csr_core::entities::*;
use csr_core::enums::*;
use csr_core::ledger::content_digest;
use csr_core::shapes::{LedgerMetadata, ProgramConfig};
use csr_core::validation::{AgeRange, CreateBeneficiaryGroupInput};

/// Validate a JSON value against a schemars-generated schema.
fn schema_errors(schema: &serde_json::Value, instance: &serde_json::Value) -> Vec<String> {
    let validator = jsonschema::validator_for(schema).expect("schema should be valid");
    validator
        .iter_errors(instance)
        .map(|e| format!("{e}"))
        .collect()
}

macro_rules! schema_accepts {
    ($name:ident, $ty:ty, $instance:expr) => {
        #[test]
        fn $name() {
            let val: $ty = $instance;
            let schema = serde_json::to_value(schema_for!($ty)).unwrap();
            let instance = serde_json::to_value(&val).unwrap();
            let errors = schema_errors(&schema, &instance);
            assert!(
                errors.is_empty(),
                "Schema validation failed for {}: {:?}",
                stringify!($ty),
                errors
            );
            let recovered: $ty = serde_json::from_value(instance).unwrap();
            assert_eq!(recovered, val);
        }
    };
}

schema_accepts!(
    beneficiary_group_schema,
    BeneficiaryGroup,
    BeneficiaryGroup {
        id: "bgp-1a2b3c4d5e6f7a8b".into(),
        company_id: "cmp-0000000000000001".into(),
        name: "Youth in Lviv".into(),
        description: None,
        group_type: BeneficiaryGroupType::Youth,
        country_code: "UA".into(),
        region: Some("Lviv Oblast".into()),
        age_range_min: Some(14),
        age_range_max: Some(21),
        min_group_size: Some(4),
        max_group_size: Some(12),
        primary_languages: vec!["uk".into()],
        tags: vec![],
        internal_notes: None,
        is_active: true,
        created_by: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
);

schema_accepts!(
    program_instance_schema,
    ProgramInstance,
    ProgramInstance {
        id: "pin-1a2b3c4d5e6f7a8b".into(),
        campaign_id: "cpg-1a2b3c4d5e6f7a8b".into(),
        company_id: "cmp-0000000000000001".into(),
        template_id: "tpl-1a2b3c4d5e6f7a8b".into(),
        name: "Spring cohort".into(),
        status: InstanceStatus::Active,
        config: ProgramConfig {
            duration_weeks: Some(10),
            ..ProgramConfig::default()
        },
        enrolled_volunteers: 12,
        enrolled_beneficiaries: 30,
        total_hours: 412.5,
        sroi_score: Some(3.2),
        vis_score: None,
        started_at: Some(Utc::now()),
        ended_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
);

schema_accepts!(
    campaign_schema,
    Campaign,
    Campaign {
        id: "cpg-1a2b3c4d5e6f7a8b".into(),
        company_id: "cmp-0000000000000001".into(),
        template_id: "tpl-1a2b3c4d5e6f7a8b".into(),
        beneficiary_group_id: "bgp-1a2b3c4d5e6f7a8b".into(),
        name: "Language cafe 2026".into(),
        status: CampaignStatus::Recruiting,
        start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        end_date: None,
        target_volunteers: 25,
        target_beneficiaries: 80,
        budget_allocated: Some(15_000.0),
        currency: "EUR".into(),
        created_by: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
);

schema_accepts!(
    ledger_entry_schema,
    LedgerEntry,
    LedgerEntry {
        id: "led-1a2b3c4d5e6f7a8b".into(),
        evidence_id: "evd-q1-hours".into(),
        evidence_type: EvidenceType::VolunteerHours,
        company_id: "cmp-0000000000000001".into(),
        content_digest: content_digest(b"412.5"),
        previous_digest: None,
        version: 1,
        event_type: LedgerEventType::Created,
        editor_id: Some("usr-0000000000000001".into()),
        editor_role: Some("manager".into()),
        report_id: None,
        lineage_id: None,
        tamper_detected: false,
        tamper_details: None,
        recorded_at: Utc::now(),
        effective_at: Utc::now(),
        retention_until: None,
        ip_hash: None,
        user_agent_hash: None,
        metadata: Some(LedgerMetadata {
            source_system: Some("benevity".into()),
            ..LedgerMetadata::default()
        }),
    }
);

schema_accepts!(
    nlq_safety_check_schema,
    NlqSafetyCheck,
    NlqSafetyCheck {
        id: "nsc-1a2b3c4d5e6f7a8b".into(),
        query_id: "nlq-1a2b3c4d5e6f7a8b".into(),
        check: SafetyCheck::TenantIsolation,
        passed: true,
        details: None,
        created_at: Utc::now(),
    }
);

#[test]
fn age_range_schema_enforces_bounds() {
    let schema = serde_json::to_value(schema_for!(AgeRange)).unwrap();
    assert!(schema_errors(&schema, &json!({"min": 0, "max": 120})).is_empty());
    assert!(!schema_errors(&schema, &json!({"min": -1, "max": 10})).is_empty());
    assert!(!schema_errors(&schema, &json!({"min": 1, "max": 121})).is_empty());
}

#[test]
fn create_group_schema_enforces_lengths_and_enums() {
    let schema = serde_json::to_value(schema_for!(CreateBeneficiaryGroupInput)).unwrap();
    let valid = json!({
        "name": "Seniors Porto",
        "group_type": "seniors",
        "country_code": "PT",
    });
    assert!(schema_errors(&schema, &valid).is_empty());

    let empty_name = json!({"name": "", "group_type": "seniors", "country_code": "PT"});
    assert!(!schema_errors(&schema, &empty_name).is_empty());

    let bad_type = json!({"name": "x", "group_type": "robots", "country_code": "PT"});
    assert!(!schema_errors(&schema, &bad_type).is_empty());

    let zero_size = json!({
        "name": "x",
        "group_type": "other",
        "country_code": "PT",
        "min_group_size": 0,
    });
    assert!(!schema_errors(&schema, &zero_size).is_empty());
}
