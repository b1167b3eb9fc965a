//! Billing subscriptions and entitlement policy storage.
//!
//! Policies are stored and listed here; evaluating them against a request is
//! the entitlement engine's job.

use chrono::{DateTime, Utc};

use csr_core::entities::{EntitlementPolicy, Subscription};
use csr_core::enums::{
    AuditAction, PolicyEffect, PolicySubjectType, ResourceType, SubscriptionPlan,
    SubscriptionStatus,
};
use csr_core::ids::{PREFIX_POLICY, PREFIX_SUBSCRIPTION};
use csr_core::shapes::PolicyConditions;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_optional_datetime,
    parse_optional_typed_json, to_opt_json_text,
};
use crate::service::CsrService;

const SUBSCRIPTION_COLS: &str = "id, company_id, plan, status, seats, current_period_start,
     current_period_end, external_customer_id, created_at, updated_at";

const POLICY_COLS: &str = "id, company_id, feature, subject_type, subject_value, effect,
     conditions, priority, created_at, updated_at";

fn row_to_subscription(row: &libsql::Row) -> Result<Subscription, DatabaseError> {
    Ok(Subscription {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        plan: parse_enum(&row.get::<String>(2)?)?,
        status: parse_enum(&row.get::<String>(3)?)?,
        seats: row.get::<i64>(4)?,
        current_period_start: parse_datetime(&row.get::<String>(5)?)?,
        current_period_end: parse_optional_datetime(get_opt_string(row, 6)?.as_deref())?,
        external_customer_id: get_opt_string(row, 7)?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
        updated_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

fn row_to_policy(row: &libsql::Row) -> Result<EntitlementPolicy, DatabaseError> {
    Ok(EntitlementPolicy {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        feature: row.get::<String>(2)?,
        subject_type: parse_enum(&row.get::<String>(3)?)?,
        subject_value: row.get::<String>(4)?,
        effect: parse_enum(&row.get::<String>(5)?)?,
        conditions: parse_optional_typed_json(get_opt_string(row, 6)?.as_deref())?,
        priority: row.get::<i64>(7)?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
        updated_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

/// Desired subscription state for [`CsrService::upsert_subscription`].
#[derive(Debug, Clone)]
pub struct SubscriptionInput {
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub seats: i64,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub external_customer_id: Option<String>,
}

/// A new entitlement policy.
#[derive(Debug, Clone)]
pub struct PolicyInput {
    pub feature: String,
    pub subject_type: PolicySubjectType,
    pub subject_value: String,
    pub effect: PolicyEffect,
    pub conditions: Option<PolicyConditions>,
    pub priority: i64,
}

impl CsrService {
    /// Create or replace the company's single subscription.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` if `seats < 1` (CHECK constraint).
    pub async fn upsert_subscription(
        &self,
        company_id: &str,
        input: &SubscriptionInput,
    ) -> Result<Subscription, DatabaseError> {
        self.check_tenant(company_id)?;
        let before = self.get_subscription(company_id).await?;
        let now = Utc::now();
        let new_id = self.db().generate_id(PREFIX_SUBSCRIPTION).await?;
        let period_end = input.current_period_end.map(|t| t.to_rfc3339());

        self.db()
            .execute_with(
                "INSERT INTO billing_subscriptions (id, company_id, plan, status, seats,
                     current_period_start, current_period_end, external_customer_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(company_id) DO UPDATE SET
                     plan = excluded.plan,
                     status = excluded.status,
                     seats = excluded.seats,
                     current_period_start = excluded.current_period_start,
                     current_period_end = excluded.current_period_end,
                     external_customer_id = excluded.external_customer_id,
                     updated_at = excluded.updated_at",
                || {
                    libsql::params![
                        new_id.as_str(),
                        company_id,
                        input.plan.as_str(),
                        input.status.as_str(),
                        input.seats,
                        input.current_period_start.to_rfc3339(),
                        period_end.as_deref(),
                        input.external_customer_id.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let subscription = self
            .get_subscription(company_id)
            .await?
            .ok_or(DatabaseError::NoResult)?;

        let action = if before.is_some() {
            AuditAction::Updated
        } else {
            AuditAction::Created
        };
        self.record_audit(
            company_id,
            action,
            ResourceType::Subscription,
            &subscription.id,
            before.as_ref().map(serde_json::to_value).transpose()?,
            Some(serde_json::to_value(&subscription)?),
        )
        .await?;

        Ok(subscription)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn get_subscription(
        &self,
        company_id: &str,
    ) -> Result<Option<Subscription>, DatabaseError> {
        self.check_tenant(company_id)?;
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SUBSCRIPTION_COLS} FROM billing_subscriptions WHERE company_id = ?1"),
                || [company_id],
            )
            .await?;
        rows.next()
            .await?
            .map(|row| row_to_subscription(&row))
            .transpose()
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::Duplicate` if a policy already exists for the
    /// same feature and subject.
    pub async fn create_policy(
        &self,
        company_id: &str,
        input: &PolicyInput,
    ) -> Result<EntitlementPolicy, DatabaseError> {
        self.check_tenant(company_id)?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_POLICY).await?;
        let conditions = to_opt_json_text(input.conditions.as_ref())?;

        self.db()
            .execute_with(
                "INSERT INTO entitlement_policies (id, company_id, feature, subject_type, subject_value,
                     effect, conditions, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        input.feature.as_str(),
                        input.subject_type.as_str(),
                        input.subject_value.as_str(),
                        input.effect.as_str(),
                        conditions.as_deref(),
                        input.priority,
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let policy = EntitlementPolicy {
            id: id.clone(),
            company_id: company_id.to_string(),
            feature: input.feature.clone(),
            subject_type: input.subject_type,
            subject_value: input.subject_value.clone(),
            effect: input.effect,
            conditions: input.conditions.clone(),
            priority: input.priority,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::EntitlementPolicy,
            &id,
            None,
            Some(serde_json::to_value(&policy)?),
        )
        .await?;

        Ok(policy)
    }

    /// Policies of a company, highest priority first, optionally for one feature.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_policies(
        &self,
        company_id: &str,
        feature: Option<&str>,
    ) -> Result<Vec<EntitlementPolicy>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = match feature {
            Some(feature) => {
                self.db()
                    .query_with(
                        &format!(
                            "SELECT {POLICY_COLS} FROM entitlement_policies
                             WHERE company_id = ?1 AND feature = ?2
                             ORDER BY priority DESC, created_at"
                        ),
                        || libsql::params![company_id, feature],
                    )
                    .await?
            }
            None => {
                self.db()
                    .query_with(
                        &format!(
                            "SELECT {POLICY_COLS} FROM entitlement_policies
                             WHERE company_id = ?1 ORDER BY feature, priority DESC"
                        ),
                        || [company_id],
                    )
                    .await?
            }
        };
        collect_rows(rows, row_to_policy).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the policy does not exist.
    pub async fn delete_policy(&self, id: &str) -> Result<(), DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {POLICY_COLS} FROM entitlement_policies WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let policy = row_to_policy(&row)?;
        self.check_tenant(&policy.company_id)?;

        self.db()
            .execute_with("DELETE FROM entitlement_policies WHERE id = ?1", || [id])
            .await?;

        self.record_audit(
            &policy.company_id,
            AuditAction::Deleted,
            ResourceType::EntitlementPolicy,
            id,
            Some(serde_json::to_value(&policy)?),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::test_support::helpers::{seed_company, test_service};

    fn starter(seats: i64) -> SubscriptionInput {
        SubscriptionInput {
            plan: SubscriptionPlan::Starter,
            status: SubscriptionStatus::Trialing,
            seats,
            current_period_start: Utc::now(),
            current_period_end: None,
            external_customer_id: Some("cus_123".into()),
        }
    }

    fn export_policy(subject: &str, priority: i64) -> PolicyInput {
        PolicyInput {
            feature: "reports.export".into(),
            subject_type: PolicySubjectType::Role,
            subject_value: subject.into(),
            effect: PolicyEffect::Allow,
            conditions: Some(PolicyConditions {
                min_plan: Some(SubscriptionPlan::Professional),
                ..PolicyConditions::default()
            }),
            priority,
        }
    }

    #[tokio::test]
    async fn subscription_is_one_per_company() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        assert!(svc.get_subscription(&company.id).await.unwrap().is_none());

        let first = svc.upsert_subscription(&company.id, &starter(5)).await.unwrap();
        let upgraded = SubscriptionInput {
            plan: SubscriptionPlan::Enterprise,
            status: SubscriptionStatus::Active,
            ..starter(50)
        };
        let second = svc.upsert_subscription(&company.id, &upgraded).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.plan, SubscriptionPlan::Enterprise);
        assert_eq!(second.seats, 50);
    }

    #[tokio::test]
    async fn zero_seats_rejected() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let err = svc
            .upsert_subscription(&company.id, &starter(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[tokio::test]
    async fn policies_listed_by_priority() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        svc.create_policy(&company.id, &export_policy("viewer", 1)).await.unwrap();
        svc.create_policy(&company.id, &export_policy("admin", 10)).await.unwrap();

        let policies = svc
            .list_policies(&company.id, Some("reports.export"))
            .await
            .unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].subject_value, "admin");
        assert_eq!(
            policies[0].conditions.as_ref().and_then(|c| c.min_plan),
            Some(SubscriptionPlan::Professional)
        );
    }

    #[tokio::test]
    async fn duplicate_policy_subject_rejected() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        svc.create_policy(&company.id, &export_policy("admin", 1)).await.unwrap();
        let err = svc
            .create_policy(&company.id, &export_policy("admin", 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Duplicate { ref table, .. } if table == "entitlement_policies"
        ));
    }

    #[tokio::test]
    async fn delete_policy_removes_row() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let policy = svc.create_policy(&company.id, &export_policy("admin", 1)).await.unwrap();
        svc.delete_policy(&policy.id).await.unwrap();
        assert!(svc.list_policies(&company.id, None).await.unwrap().is_empty());
        assert!(matches!(
            svc.delete_policy(&policy.id).await,
            Err(DatabaseError::NoResult)
        ));
    }
}
