//! Buddy matching: participant/buddy pairs and the events the buddy service
//! sends about them.

use chrono::{DateTime, Utc};
use serde_json::Value;

use csr_core::entities::{BuddyEvent, BuddyMatch};
use csr_core::enums::{AuditAction, MatchStatus, ResourceType};
use csr_core::ids::{PREFIX_BUDDY_EVENT, PREFIX_MATCH};
use csr_core::shapes::StatusChangedDetail;
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_json, parse_optional_datetime,
    to_json_text,
};
use crate::repos::Recorded;
use crate::service::CsrService;

const MATCH_COLS: &str = "id, company_id, program_instance_id, participant_id, buddy_id, status,
     matched_at, ended_at, end_reason";

const EVENT_COLS: &str =
    "id, event_id, event_type, company_id, match_id, payload, occurred_at, processed_at, created_at";

fn row_to_match(row: &libsql::Row) -> Result<BuddyMatch, DatabaseError> {
    Ok(BuddyMatch {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        program_instance_id: get_opt_string(row, 2)?,
        participant_id: row.get::<String>(3)?,
        buddy_id: row.get::<String>(4)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        matched_at: parse_datetime(&row.get::<String>(6)?)?,
        ended_at: parse_optional_datetime(get_opt_string(row, 7)?.as_deref())?,
        end_reason: get_opt_string(row, 8)?,
    })
}

fn row_to_event(row: &libsql::Row) -> Result<BuddyEvent, DatabaseError> {
    Ok(BuddyEvent {
        id: row.get::<String>(0)?,
        event_id: row.get::<String>(1)?,
        event_type: row.get::<String>(2)?,
        company_id: row.get::<String>(3)?,
        match_id: get_opt_string(row, 4)?,
        payload: parse_json(&row.get::<String>(5)?)?,
        occurred_at: parse_datetime(&row.get::<String>(6)?)?,
        processed_at: parse_optional_datetime(get_opt_string(row, 7)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
    })
}

/// A buddy-service event as received.
#[derive(Debug, Clone, PartialEq)]
pub struct BuddyEventInput {
    pub event_id: String,
    pub event_type: String,
    pub match_id: Option<String>,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl CsrService {
    /// Pair a participant with a buddy. A pair can hold only one open match.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` when participant and buddy are the
    /// same, and `InvalidState` when the pair already has an open match.
    pub async fn create_match(
        &self,
        company_id: &str,
        program_instance_id: Option<&str>,
        participant_id: &str,
        buddy_id: &str,
    ) -> Result<BuddyMatch, DatabaseError> {
        self.check_tenant(company_id)?;
        if participant_id == buddy_id {
            return Err(DatabaseError::Validation(vec![ValidationIssue::new(
                "buddy_id",
                "must differ from participant_id",
            )]));
        }
        if let Some(instance_id) = program_instance_id {
            let instance = self.get_program_instance(instance_id).await?;
            if instance.company_id != company_id {
                return Err(DatabaseError::TenantMismatch {
                    actor_company: company_id.to_string(),
                    company: instance.company_id,
                });
            }
        }

        let mut rows = self
            .db()
            .query_with(
                "SELECT id FROM buddy_matches
                 WHERE company_id = ?1 AND participant_id = ?2 AND buddy_id = ?3
                   AND status <> 'ended'",
                || libsql::params![company_id, participant_id, buddy_id],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            let existing = row.get::<String>(0)?;
            return Err(DatabaseError::InvalidState(format!(
                "participant {participant_id} and buddy {buddy_id} already have open match {existing}"
            )));
        }

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_MATCH).await?;
        self.db()
            .execute_with(
                "INSERT INTO buddy_matches (id, company_id, program_instance_id, participant_id,
                     buddy_id, status, matched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        program_instance_id,
                        participant_id,
                        buddy_id,
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let buddy_match = BuddyMatch {
            id: id.clone(),
            company_id: company_id.to_string(),
            program_instance_id: program_instance_id.map(String::from),
            participant_id: participant_id.to_string(),
            buddy_id: buddy_id.to_string(),
            status: MatchStatus::Active,
            matched_at: now,
            ended_at: None,
            end_reason: None,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::BuddyMatch,
            &id,
            None,
            Some(serde_json::to_value(&buddy_match)?),
        )
        .await?;

        Ok(buddy_match)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the match does not exist.
    pub async fn get_match(&self, id: &str) -> Result<BuddyMatch, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {MATCH_COLS} FROM buddy_matches WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let buddy_match = row_to_match(&row)?;
        self.check_tenant(&buddy_match.company_id)?;
        Ok(buddy_match)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_matches(
        &self,
        company_id: &str,
        status: Option<MatchStatus>,
    ) -> Result<Vec<BuddyMatch>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {MATCH_COLS} FROM buddy_matches
                     WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY matched_at DESC"
                ),
                || libsql::params![company_id, status.map(MatchStatus::as_str)],
            )
            .await?;
        collect_rows(rows, row_to_match).await
    }

    /// Close a match for good.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the match already ended.
    pub async fn end_match(
        &self,
        id: &str,
        reason: Option<&str>,
    ) -> Result<BuddyMatch, DatabaseError> {
        let current = self.get_match(id).await?;
        if !current.status.can_transition_to(MatchStatus::Ended) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition buddy match {id} from {} to {}",
                current.status,
                MatchStatus::Ended
            )));
        }

        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE buddy_matches SET status = 'ended', ended_at = ?1, end_reason = ?2
                 WHERE id = ?3",
                || libsql::params![now.to_rfc3339(), reason, id],
            )
            .await?;

        let detail = StatusChangedDetail {
            from: current.status.as_str().to_string(),
            to: MatchStatus::Ended.as_str().to_string(),
            reason: reason.map(String::from),
        };
        self.record_audit(
            &current.company_id,
            AuditAction::StatusChanged,
            ResourceType::BuddyMatch,
            id,
            None,
            Some(serde_json::to_value(&detail)?),
        )
        .await?;

        Ok(BuddyMatch {
            status: MatchStatus::Ended,
            ended_at: Some(now),
            end_reason: reason.map(String::from),
            ..current
        })
    }

    /// Store a buddy-service event once. A redelivered `event_id` returns the
    /// stored row as [`Recorded::Duplicate`] and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT or the lookup fails.
    pub async fn record_buddy_event(
        &self,
        company_id: &str,
        event: &BuddyEventInput,
    ) -> Result<Recorded<BuddyEvent>, DatabaseError> {
        self.check_tenant(company_id)?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_BUDDY_EVENT).await?;
        let payload = to_json_text(&event.payload)?;

        let inserted = self
            .db()
            .execute_with(
                "INSERT INTO buddy_system_events (id, event_id, event_type, company_id, match_id,
                     payload, occurred_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(event_id) DO NOTHING",
                || {
                    libsql::params![
                        id.as_str(),
                        event.event_id.as_str(),
                        event.event_type.as_str(),
                        company_id,
                        event.match_id.as_deref(),
                        payload.as_str(),
                        event.occurred_at.to_rfc3339(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        if inserted == 0 {
            tracing::debug!(event_id = %event.event_id, "buddy event already recorded");
            let existing = self.get_buddy_event_by_event_id(&event.event_id).await?;
            return Ok(Recorded::Duplicate(existing));
        }

        Ok(Recorded::Inserted(BuddyEvent {
            id,
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            company_id: company_id.to_string(),
            match_id: event.match_id.clone(),
            payload: event.payload.clone(),
            occurred_at: event.occurred_at,
            processed_at: None,
            created_at: now,
        }))
    }

    async fn get_buddy_event_by_event_id(&self, event_id: &str) -> Result<BuddyEvent, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {EVENT_COLS} FROM buddy_system_events WHERE event_id = ?1"),
                || [event_id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let event = row_to_event(&row)?;
        self.check_tenant(&event.company_id)?;
        Ok(event)
    }

    /// Stamp an event as handled. Stamping twice keeps the first time.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if no event has this `event_id`.
    pub async fn mark_buddy_event_processed(
        &self,
        event_id: &str,
    ) -> Result<BuddyEvent, DatabaseError> {
        self.get_buddy_event_by_event_id(event_id).await?;
        self.db()
            .execute_with(
                "UPDATE buddy_system_events SET processed_at = ?1
                 WHERE event_id = ?2 AND processed_at IS NULL",
                || libsql::params![Utc::now().to_rfc3339(), event_id],
            )
            .await?;
        self.get_buddy_event_by_event_id(event_id).await
    }

    /// Events of a company, oldest first, optionally for one match.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_buddy_events(
        &self,
        company_id: &str,
        match_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<BuddyEvent>, DatabaseError> {
        self.check_tenant(company_id)?;
        let limit = self.limit_or_default(limit);
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {EVENT_COLS} FROM buddy_system_events
                     WHERE company_id = ?1 AND (?2 IS NULL OR match_id = ?2)
                     ORDER BY julianday(occurred_at), rowid
                     LIMIT ?3"
                ),
                || libsql::params![company_id, match_id, limit],
            )
            .await?;
        collect_rows(rows, row_to_event).await
    }
}
