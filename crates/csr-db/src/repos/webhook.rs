//! Inbound webhook deliveries and event-id deduplication.
//!
//! Both tables are arbitrated by a unique key: the database decides which of
//! two concurrent receivers owns a delivery or an event, and the loser gets a
//! typed outcome instead of an error.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use csr_core::entities::{EventDedupRecord, ImpactDelivery};
use csr_core::enums::{DeliveryStatus, WebhookSource};
use csr_core::ids::{PREFIX_DELIVERY, PREFIX_EVENT_DEDUP};

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_json, parse_optional_datetime,
    to_json_text,
};
use crate::repos::Recorded;
use crate::service::CsrService;

const DELIVERY_COLS: &str = "id, delivery_id, company_id, source, event_type, payload, status,
     attempts, last_error, received_at, processed_at";

const DEDUP_COLS: &str = "id, event_id, event_type, source, processed_at, expires_at";

fn row_to_delivery(row: &libsql::Row) -> Result<ImpactDelivery, DatabaseError> {
    Ok(ImpactDelivery {
        id: row.get::<String>(0)?,
        delivery_id: row.get::<String>(1)?,
        company_id: row.get::<String>(2)?,
        source: parse_enum(&row.get::<String>(3)?)?,
        event_type: row.get::<String>(4)?,
        payload: parse_json(&row.get::<String>(5)?)?,
        status: parse_enum(&row.get::<String>(6)?)?,
        attempts: row.get::<i64>(7)?,
        last_error: get_opt_string(row, 8)?,
        received_at: parse_datetime(&row.get::<String>(9)?)?,
        processed_at: parse_optional_datetime(get_opt_string(row, 10)?.as_deref())?,
    })
}

fn row_to_dedup(row: &libsql::Row) -> Result<EventDedupRecord, DatabaseError> {
    Ok(EventDedupRecord {
        id: row.get::<String>(0)?,
        event_id: row.get::<String>(1)?,
        event_type: row.get::<String>(2)?,
        source: row.get::<String>(3)?,
        processed_at: parse_datetime(&row.get::<String>(4)?)?,
        expires_at: parse_datetime(&row.get::<String>(5)?)?,
    })
}

/// A webhook delivery as received from an upstream platform.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryInput {
    pub delivery_id: String,
    pub source: WebhookSource,
    pub event_type: String,
    pub payload: Value,
}

impl CsrService {
    /// Store a delivery once. A repeated `delivery_id` returns the stored row
    /// as [`Recorded::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT or the lookup fails.
    pub async fn record_delivery(
        &self,
        company_id: &str,
        input: &DeliveryInput,
    ) -> Result<Recorded<ImpactDelivery>, DatabaseError> {
        self.check_tenant(company_id)?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_DELIVERY).await?;
        let payload = to_json_text(&input.payload)?;

        let inserted = self
            .db()
            .execute_with(
                "INSERT INTO impact_deliveries (id, delivery_id, company_id, source, event_type,
                     payload, status, attempts, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'received', 0, ?7)
                 ON CONFLICT(delivery_id) DO NOTHING",
                || {
                    libsql::params![
                        id.as_str(),
                        input.delivery_id.as_str(),
                        company_id,
                        input.source.as_str(),
                        input.event_type.as_str(),
                        payload.as_str(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        if inserted == 0 {
            tracing::debug!(delivery_id = %input.delivery_id, "duplicate webhook delivery");
            return Ok(Recorded::Duplicate(self.get_delivery(&input.delivery_id).await?));
        }

        Ok(Recorded::Inserted(ImpactDelivery {
            id,
            delivery_id: input.delivery_id.clone(),
            company_id: company_id.to_string(),
            source: input.source,
            event_type: input.event_type.clone(),
            payload: input.payload.clone(),
            status: DeliveryStatus::Received,
            attempts: 0,
            last_error: None,
            received_at: now,
            processed_at: None,
        }))
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if no delivery has this id.
    pub async fn get_delivery(&self, delivery_id: &str) -> Result<ImpactDelivery, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {DELIVERY_COLS} FROM impact_deliveries WHERE delivery_id = ?1"),
                || [delivery_id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let delivery = row_to_delivery(&row)?;
        self.check_tenant(&delivery.company_id)?;
        Ok(delivery)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_deliveries(
        &self,
        company_id: &str,
        status: Option<DeliveryStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<ImpactDelivery>, DatabaseError> {
        self.check_tenant(company_id)?;
        let limit = self.limit_or_default(limit);
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {DELIVERY_COLS} FROM impact_deliveries
                     WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY julianday(received_at), rowid
                     LIMIT ?3"
                ),
                || libsql::params![company_id, status.map(DeliveryStatus::as_str), limit],
            )
            .await?;
        collect_rows(rows, row_to_delivery).await
    }

    /// Claim a received or failed delivery for processing and count the
    /// attempt. Only one caller can win the claim.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` when the delivery is already
    /// processing or processed.
    pub async fn mark_delivery_processing(
        &self,
        delivery_id: &str,
    ) -> Result<ImpactDelivery, DatabaseError> {
        self.move_delivery(
            delivery_id,
            DeliveryStatus::Processing,
            "UPDATE impact_deliveries
             SET status = 'processing', attempts = attempts + 1
             WHERE delivery_id = ?1 AND status IN ('received', 'failed')",
            None,
        )
        .await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` unless the delivery is processing.
    pub async fn mark_delivery_processed(
        &self,
        delivery_id: &str,
    ) -> Result<ImpactDelivery, DatabaseError> {
        self.move_delivery(
            delivery_id,
            DeliveryStatus::Processed,
            "UPDATE impact_deliveries
             SET status = 'processed', processed_at = ?2, last_error = NULL
             WHERE delivery_id = ?1 AND status = 'processing'",
            Some(Utc::now().to_rfc3339()),
        )
        .await
    }

    /// Record a failed attempt. The delivery can be claimed again.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` unless the delivery is processing.
    pub async fn mark_delivery_failed(
        &self,
        delivery_id: &str,
        error: &str,
    ) -> Result<ImpactDelivery, DatabaseError> {
        self.move_delivery(
            delivery_id,
            DeliveryStatus::Failed,
            "UPDATE impact_deliveries
             SET status = 'failed', last_error = ?2
             WHERE delivery_id = ?1 AND status = 'processing'",
            Some(error.to_string()),
        )
        .await
    }

    /// Run a guarded status UPDATE. Zero affected rows means another caller
    /// moved the delivery first or the transition is not allowed.
    async fn move_delivery(
        &self,
        delivery_id: &str,
        to: DeliveryStatus,
        sql: &str,
        extra: Option<String>,
    ) -> Result<ImpactDelivery, DatabaseError> {
        let current = self.get_delivery(delivery_id).await?;
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition delivery {delivery_id} from {} to {to}",
                current.status
            )));
        }

        let changed = match extra {
            Some(ref value) => {
                self.db()
                    .execute_with(sql, || libsql::params![delivery_id, value.as_str()])
                    .await?
            }
            None => self.db().execute_with(sql, || [delivery_id]).await?,
        };
        if changed == 0 {
            return Err(DatabaseError::InvalidState(format!(
                "delivery {delivery_id} was moved by another worker"
            )));
        }

        self.get_delivery(delivery_id).await
    }

    /// Claim an event id for processing. Returns `false` when the id was
    /// already claimed and has not expired. An expired claim is replaced.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statements fail.
    pub async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        source: &str,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(i64::from(self.settings().event_ttl_hours));

        self.db()
            .execute_with(
                "DELETE FROM event_deduplication
                 WHERE event_id = ?1 AND julianday(expires_at) <= julianday(?2)",
                || libsql::params![event_id, now.to_rfc3339()],
            )
            .await?;

        let id = self.db().generate_id(PREFIX_EVENT_DEDUP).await?;
        let inserted = self
            .db()
            .execute_with(
                "INSERT INTO event_deduplication (id, event_id, event_type, source, processed_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(event_id) DO NOTHING",
                || {
                    libsql::params![
                        id.as_str(),
                        event_id,
                        event_type,
                        source,
                        now.to_rfc3339(),
                        expires_at.to_rfc3339()
                    ]
                },
            )
            .await?;

        if inserted == 0 {
            tracing::debug!(event_id, "event already claimed");
        }
        Ok(inserted == 1)
    }

    /// The live claim on an event id, if any.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn get_event_claim(
        &self,
        event_id: &str,
    ) -> Result<Option<EventDedupRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {DEDUP_COLS} FROM event_deduplication
                     WHERE event_id = ?1 AND julianday(expires_at) > julianday(?2)"
                ),
                || libsql::params![event_id, Utc::now().to_rfc3339()],
            )
            .await?;
        rows.next().await?.map(|row| row_to_dedup(&row)).transpose()
    }

    /// Delete claims that expired before `now`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the DELETE fails.
    pub async fn purge_expired_events(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let removed = self
            .db()
            .execute_with(
                "DELETE FROM event_deduplication WHERE julianday(expires_at) <= julianday(?1)",
                || [now.to_rfc3339()],
            )
            .await?;
        if removed > 0 {
            tracing::info!(removed, "purged expired event claims");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::test_support::helpers::{seed_company, test_service};

    fn kintell_delivery(id: &str) -> DeliveryInput {
        DeliveryInput {
            delivery_id: id.into(),
            source: WebhookSource::Kintell,
            event_type: "session.completed".into(),
            payload: json!({ "session_id": "s-1", "minutes": 60 }),
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_returns_stored_row() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;

        let first = svc
            .record_delivery(&company.id, &kintell_delivery("dl-1"))
            .await
            .unwrap();
        let Recorded::Inserted(stored) = first else {
            panic!("first delivery should insert");
        };

        let second = svc
            .record_delivery(&company.id, &kintell_delivery("dl-1"))
            .await
            .unwrap();
        assert_eq!(second, Recorded::Duplicate(stored));
        assert_eq!(svc.list_deliveries(&company.id, None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_after_failure_counts_attempts() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        svc.record_delivery(&company.id, &kintell_delivery("dl-1"))
            .await
            .unwrap();

        svc.mark_delivery_processing("dl-1").await.unwrap();
        let failed = svc.mark_delivery_failed("dl-1", "upstream 503").await.unwrap();
        assert_eq!(failed.status, DeliveryStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("upstream 503"));

        svc.mark_delivery_processing("dl-1").await.unwrap();
        let done = svc.mark_delivery_processed("dl-1").await.unwrap();
        assert_eq!(done.status, DeliveryStatus::Processed);
        assert_eq!(done.attempts, 2);
        assert_eq!(done.last_error, None);
        assert!(done.processed_at.is_some());
    }

    #[tokio::test]
    async fn second_claim_on_processing_delivery_fails() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        svc.record_delivery(&company.id, &kintell_delivery("dl-1"))
            .await
            .unwrap();
        svc.mark_delivery_processing("dl-1").await.unwrap();
        assert!(matches!(
            svc.mark_delivery_processing("dl-1").await,
            Err(DatabaseError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn processed_delivery_is_final() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        svc.record_delivery(&company.id, &kintell_delivery("dl-1"))
            .await
            .unwrap();
        assert!(matches!(
            svc.mark_delivery_processed("dl-1").await,
            Err(DatabaseError::InvalidState(_))
        ));
        svc.mark_delivery_processing("dl-1").await.unwrap();
        svc.mark_delivery_processed("dl-1").await.unwrap();
        assert!(matches!(
            svc.mark_delivery_failed("dl-1", "late").await,
            Err(DatabaseError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn event_can_be_claimed_once() {
        let svc = test_service().await;
        assert!(svc.claim_event("evt-1", "hours.logged", "benevity").await.unwrap());
        assert!(!svc.claim_event("evt-1", "hours.logged", "benevity").await.unwrap());

        let claim = svc.get_event_claim("evt-1").await.unwrap().unwrap();
        let ttl = claim.expires_at - claim.processed_at;
        assert_eq!(ttl.num_hours(), i64::from(svc.settings().event_ttl_hours));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_claims() {
        let svc = test_service().await;
        svc.claim_event("evt-1", "hours.logged", "benevity").await.unwrap();
        svc.claim_event("evt-2", "hours.logged", "benevity").await.unwrap();

        assert_eq!(svc.purge_expired_events(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + Duration::hours(i64::from(svc.settings().event_ttl_hours) + 1);
        assert_eq!(svc.purge_expired_events(later).await.unwrap(), 2);
        assert!(svc.get_event_claim("evt-1").await.unwrap().is_none());
        assert!(svc.claim_event("evt-1", "hours.logged", "benevity").await.unwrap());
    }

    #[tokio::test]
    async fn expired_claim_is_replaced() {
        let svc = test_service().await;
        svc.db()
            .execute(
                "INSERT INTO event_deduplication (id, event_id, event_type, source, expires_at)
                 VALUES ('edd-old', 'evt-9', 'hours.logged', 'workday', '2020-01-01T00:00:00Z')",
                (),
            )
            .await
            .unwrap();
        assert!(svc.get_event_claim("evt-9").await.unwrap().is_none());
        assert!(svc.claim_event("evt-9", "hours.logged", "workday").await.unwrap());
    }
}
