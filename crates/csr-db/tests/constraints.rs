//! Schema constraint and lifecycle integration tests
//!
//! - Unique keys on the dedup tables, raw and through the repositories
//! - CHECK constraints surfacing as validation errors
//! - Foreign key delete behavior
//! - State machine enforcement for campaigns, instances, publications and
//!   webhook deliveries
//! - Tenant isolation of write paths under a foreign actor

use chrono::{NaiveDate, Utc};
use serde_json::json;

use csr_core::enums::{
    BeneficiaryGroupType, CampaignStatus, InstanceStatus, ProgramType, PublicationStatus,
    PublicationVisibility, UserRole, WebhookSource,
};
use csr_core::identity::Actor;
use csr_core::shapes::ProgramConfig;
use csr_core::validation::{AgeRange, CreateBeneficiaryGroupInput};
use csr_db::CsrDb;
use csr_db::error::DatabaseError;
use csr_db::repos::buddy::BuddyEventInput;
use csr_db::repos::campaign::CampaignInput;
use csr_db::repos::idempotency::IdempotencyOutcome;
use csr_db::repos::publication::PublicationInput;
use csr_db::repos::webhook::DeliveryInput;
use csr_db::service::CsrService;

async fn test_service() -> CsrService {
    let db = CsrDb::open_local(":memory:").await.unwrap();
    CsrService::from_db(db)
}

async fn company(svc: &CsrService, slug: &str) -> String {
    svc.create_company(&format!("Company {slug}"), slug, None, Some("DE"))
        .await
        .unwrap()
        .id
}

async fn admin_of(svc: &CsrService, company_id: &str, slug: &str) -> Actor {
    let user = svc
        .create_user(company_id, &format!("admin@{slug}.example"), None, UserRole::Admin)
        .await
        .unwrap();
    Actor {
        user_id: user.id,
        company_id: user.company_id,
        role: UserRole::Admin,
        ip_address: None,
        user_agent: None,
    }
}

fn group_input() -> CreateBeneficiaryGroupInput {
    CreateBeneficiaryGroupInput {
        name: "Young refugees Berlin".into(),
        description: None,
        group_type: BeneficiaryGroupType::Refugees,
        country_code: "DE".into(),
        region: Some("Berlin".into()),
        age_range: Some(AgeRange { min: 16, max: 25 }),
        min_group_size: Some(5),
        max_group_size: Some(20),
        primary_languages: vec!["uk".into(), "ar".into()],
        tags: vec!["youth".into()],
        internal_notes: None,
    }
}

async fn campaign(svc: &CsrService, company_id: &str) -> String {
    let template = svc
        .create_template(
            Some(company_id),
            "Mentoring circle",
            ProgramType::Mentorship,
            None,
            &ProgramConfig::default(),
        )
        .await
        .unwrap();
    let group = svc
        .create_beneficiary_group(company_id, &group_input())
        .await
        .unwrap();
    let input = CampaignInput {
        template_id: template.id,
        beneficiary_group_id: group.id,
        name: "Autumn mentoring".into(),
        start_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        end_date: None,
        target_volunteers: 8,
        target_beneficiaries: 16,
        budget_allocated: None,
        currency: Some("EUR".into()),
    };
    svc.create_campaign(company_id, &input).await.unwrap().id
}

// ---------------------------------------------------------------------------
// Unique keys
// ---------------------------------------------------------------------------

#[tokio::test]
async fn event_id_is_unique_in_sql() {
    let svc = test_service().await;
    let insert = |id: &'static str| {
        svc.db().conn().execute(
            "INSERT INTO event_deduplication (id, event_id, event_type, source, expires_at)
             VALUES (?1, 'evt-1', 'session.completed', 'kintell', '2099-01-01T00:00:00Z')",
            [id],
        )
    };
    insert("edd-1").await.unwrap();
    let err = insert("edd-2").await.unwrap_err();
    assert!(matches!(
        DatabaseError::from(err),
        DatabaseError::Duplicate { ref table, ref key }
            if table == "event_deduplication" && key == "event_id"
    ));
}

#[tokio::test]
async fn idempotency_key_is_unique_in_sql() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let insert = |id: &'static str| {
        svc.db().conn().execute(
            "INSERT INTO api_request_deduplication
                 (id, idempotency_key, company_id, endpoint, request_hash, expires_at)
             VALUES (?1, 'key-1', ?2, 'POST /x', 'h', '2099-01-01T00:00:00Z')",
            [id, company_id.as_str()],
        )
    };
    insert("idm-1").await.unwrap();
    assert!(matches!(
        DatabaseError::from(insert("idm-2").await.unwrap_err()),
        DatabaseError::Duplicate { ref key, .. } if key == "idempotency_key"
    ));
}

#[tokio::test]
async fn repeated_deliveries_and_events_are_recorded_once() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;

    let delivery = DeliveryInput {
        delivery_id: "dlv-ext-42".into(),
        source: WebhookSource::Benevity,
        event_type: "donation.created".into(),
        payload: json!({ "amount": 50 }),
    };
    let first = svc.record_delivery(&company_id, &delivery).await.unwrap();
    let second = svc.record_delivery(&company_id, &delivery).await.unwrap();
    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(first.into_inner().id, second.into_inner().id);

    let event = BuddyEventInput {
        event_id: "bud-evt-1".into(),
        event_type: "match.checkin".into(),
        match_id: None,
        payload: json!({}),
        occurred_at: Utc::now(),
    };
    assert!(!svc.record_buddy_event(&company_id, &event).await.unwrap().is_duplicate());
    assert!(svc.record_buddy_event(&company_id, &event).await.unwrap().is_duplicate());

    assert!(svc.claim_event("evt-9", "session.completed", "kintell").await.unwrap());
    assert!(!svc.claim_event("evt-9", "session.completed", "kintell").await.unwrap());
}

// ---------------------------------------------------------------------------
// CHECK constraints and validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn group_refinements_reject_bad_input() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;

    let inverted = CreateBeneficiaryGroupInput {
        min_group_size: Some(30),
        max_group_size: Some(10),
        ..group_input()
    };
    assert!(matches!(
        svc.create_beneficiary_group(&company_id, &inverted).await,
        Err(DatabaseError::Validation(_))
    ));

    let too_old = CreateBeneficiaryGroupInput {
        age_range: Some(AgeRange { min: 18, max: 130 }),
        ..group_input()
    };
    assert!(matches!(
        svc.create_beneficiary_group(&company_id, &too_old).await,
        Err(DatabaseError::Validation(_))
    ));

    let leaky = CreateBeneficiaryGroupInput {
        internal_notes: Some("contact jane.doe@example.org".into()),
        ..group_input()
    };
    assert!(matches!(
        svc.create_beneficiary_group(&company_id, &leaky).await,
        Err(DatabaseError::Validation(_))
    ));
}

#[tokio::test]
async fn metric_check_rejects_inverted_period_in_sql() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let err = svc
        .db()
        .conn()
        .execute(
            "INSERT INTO metric_snapshots (id, company_id, period_start, period_end)
             VALUES ('met-1', ?1, '2026-06-30', '2026-01-01')",
            [company_id.as_str()],
        )
        .await
        .unwrap_err();
    assert!(matches!(DatabaseError::from(err), DatabaseError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Foreign keys
// ---------------------------------------------------------------------------

#[tokio::test]
async fn company_with_ledger_entries_cannot_be_deleted() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let input = csr_db::repos::ledger::EvidenceInput::new(
        "evd-1",
        csr_core::enums::EvidenceType::Document,
        csr_core::enums::LedgerEventType::Created,
        b"report.pdf",
    );
    svc.append_evidence(&company_id, &input).await.unwrap();

    let err = svc
        .db()
        .conn()
        .execute("DELETE FROM companies WHERE id = ?1", [company_id.as_str()])
        .await
        .unwrap_err();
    assert!(matches!(DatabaseError::from(err), DatabaseError::ForeignKey(_)));
}

// ---------------------------------------------------------------------------
// State machines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn campaign_cannot_skip_to_completed() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let id = campaign(&svc, &company_id).await;

    assert!(matches!(
        svc.transition_campaign(&id, CampaignStatus::Completed, None).await,
        Err(DatabaseError::InvalidState(_))
    ));
    for to in [CampaignStatus::Planned, CampaignStatus::Active, CampaignStatus::Completed] {
        svc.transition_campaign(&id, to, None).await.unwrap();
    }
    assert_eq!(svc.get_campaign(&id).await.unwrap().status, CampaignStatus::Completed);
    assert!(matches!(
        svc.transition_campaign(&id, CampaignStatus::Active, Some("reopen")).await,
        Err(DatabaseError::InvalidState(_))
    ));
}

#[tokio::test]
async fn completed_instance_stays_completed() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let campaign_id = campaign(&svc, &company_id).await;
    let instance = svc
        .create_program_instance(&campaign_id, "Cohort 1", None)
        .await
        .unwrap();

    svc.transition_program_instance(&instance.id, InstanceStatus::Active, None)
        .await
        .unwrap();
    svc.transition_program_instance(&instance.id, InstanceStatus::Completed, None)
        .await
        .unwrap();
    assert!(matches!(
        svc.transition_program_instance(&instance.id, InstanceStatus::Active, None)
            .await,
        Err(DatabaseError::InvalidState(_))
    ));
}

#[tokio::test]
async fn archived_publication_cannot_go_live() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let publication = svc
        .create_publication(
            &company_id,
            &PublicationInput {
                slug: "acme-impact".into(),
                title: "Acme impact".into(),
                description: None,
                visibility: PublicationVisibility::Public,
                access_token: None,
            },
        )
        .await
        .unwrap();
    svc.transition_publication(&publication.id, PublicationStatus::Archived)
        .await
        .unwrap();
    assert!(matches!(
        svc.transition_publication(&publication.id, PublicationStatus::Live)
            .await,
        Err(DatabaseError::InvalidState(_))
    ));
}

#[tokio::test]
async fn processed_delivery_is_final() {
    let svc = test_service().await;
    let company_id = company(&svc, "acme").await;
    let delivery = DeliveryInput {
        delivery_id: "dlv-1".into(),
        source: WebhookSource::Kintell,
        event_type: "session.completed".into(),
        payload: json!({ "minutes": 60 }),
    };
    svc.record_delivery(&company_id, &delivery).await.unwrap();

    assert!(matches!(
        svc.mark_delivery_processed("dlv-1").await,
        Err(DatabaseError::InvalidState(_))
    ));
    svc.mark_delivery_processing("dlv-1").await.unwrap();
    svc.mark_delivery_processed("dlv-1").await.unwrap();
    assert!(matches!(
        svc.mark_delivery_processing("dlv-1").await,
        Err(DatabaseError::InvalidState(_))
    ));
}

// ---------------------------------------------------------------------------
// Tenant isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_actor_cannot_forge_idempotent_response() {
    let svc = test_service().await;
    let acme = company(&svc, "acme").await;
    let globex = company(&svc, "globex").await;
    let acme_admin = admin_of(&svc, &acme, "acme").await;
    let globex_admin = admin_of(&svc, &globex, "globex").await;
    let body = json!({ "name": "Autumn mentoring" });

    let svc = svc.with_actor(acme_admin.clone());
    assert!(matches!(
        svc.begin_request(&acme, "key-1", "POST /campaigns", &body)
            .await
            .unwrap(),
        IdempotencyOutcome::Fresh(_)
    ));

    let svc = svc.with_actor(globex_admin);
    assert!(matches!(
        svc.complete_request(&acme, "key-1", 201, Some(&json!({ "forged": true })))
            .await,
        Err(DatabaseError::TenantMismatch { .. })
    ));
    assert!(matches!(
        svc.complete_request(&globex, "key-1", 201, Some(&json!({ "forged": true })))
            .await,
        Err(DatabaseError::InvalidState(_))
    ));
    assert!(matches!(
        svc.abandon_request(&acme, "key-1").await,
        Err(DatabaseError::TenantMismatch { .. })
    ));

    let svc = svc.with_actor(acme_admin);
    assert_eq!(
        svc.begin_request(&acme, "key-1", "POST /campaigns", &body)
            .await
            .unwrap(),
        IdempotencyOutcome::InFlight
    );
}

#[tokio::test]
async fn foreign_actor_cannot_move_delivery() {
    let svc = test_service().await;
    let acme = company(&svc, "acme").await;
    let globex = company(&svc, "globex").await;
    let globex_admin = admin_of(&svc, &globex, "globex").await;
    let delivery = DeliveryInput {
        delivery_id: "dlv-acme-1".into(),
        source: WebhookSource::Benevity,
        event_type: "donation.created".into(),
        payload: json!({ "amount": 25 }),
    };
    svc.record_delivery(&acme, &delivery).await.unwrap();

    let svc = svc.with_actor(globex_admin);
    for result in [
        svc.mark_delivery_processing("dlv-acme-1").await,
        svc.mark_delivery_failed("dlv-acme-1", "spoofed").await,
    ] {
        assert!(matches!(result, Err(DatabaseError::TenantMismatch { .. })));
    }
    assert!(matches!(
        svc.record_delivery(&acme, &delivery).await,
        Err(DatabaseError::TenantMismatch { .. })
    ));
}

#[tokio::test]
async fn foreign_actor_cannot_transition_campaign() {
    let svc = test_service().await;
    let acme = company(&svc, "acme").await;
    let globex = company(&svc, "globex").await;
    let globex_admin = admin_of(&svc, &globex, "globex").await;
    let id = campaign(&svc, &acme).await;

    let svc = svc.with_actor(globex_admin);
    assert!(matches!(
        svc.transition_campaign(&id, CampaignStatus::Planned, None).await,
        Err(DatabaseError::TenantMismatch { .. })
    ));
    assert!(matches!(
        svc.get_campaign(&id).await,
        Err(DatabaseError::TenantMismatch { .. })
    ));
}
