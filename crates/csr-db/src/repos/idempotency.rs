//! API idempotency keys.
//!
//! The first request with a key inserts a row without a response; the handler
//! stores the response when done. Retries with the same key and body replay
//! that response, and a different body under the same key is a conflict.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use csr_core::entities::ApiRequestRecord;
use csr_core::ids::PREFIX_IDEMPOTENCY;
use csr_core::ledger::content_digest;

use crate::error::DatabaseError;
use crate::helpers::{
    get_opt_string, parse_datetime, parse_optional_json, to_json_text, to_opt_json_text,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, idempotency_key, company_id, endpoint, request_hash,
     response_status, response_body, created_at, expires_at";

fn row_to_request(row: &libsql::Row) -> Result<ApiRequestRecord, DatabaseError> {
    Ok(ApiRequestRecord {
        id: row.get::<String>(0)?,
        idempotency_key: row.get::<String>(1)?,
        company_id: row.get::<String>(2)?,
        endpoint: row.get::<String>(3)?,
        request_hash: row.get::<String>(4)?,
        response_status: row.get::<Option<i64>>(5)?,
        response_body: parse_optional_json(get_opt_string(row, 6)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(7)?)?,
        expires_at: parse_datetime(&row.get::<String>(8)?)?,
    })
}

/// SHA-256 of the request body's JSON text. `serde_json` maps keep keys
/// sorted, so equal bodies hash equally regardless of input key order.
///
/// # Errors
///
/// Returns `DatabaseError::Other` if the body cannot be serialized.
pub fn request_hash(body: &Value) -> Result<String, DatabaseError> {
    Ok(content_digest(to_json_text(body)?.as_bytes()))
}

/// What the caller should do with an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// First time this key is seen: handle the request, then call
    /// `complete_request`.
    Fresh(ApiRequestRecord),
    /// The original request is still being handled.
    InFlight,
    /// Return the stored response unchanged.
    Replay {
        status: i64,
        body: Option<Value>,
    },
    /// The key was used for another endpoint, tenant, or body.
    Conflict,
}

impl CsrService {
    /// Arbitrate an incoming request by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statements fail.
    pub async fn begin_request(
        &self,
        company_id: &str,
        idempotency_key: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<IdempotencyOutcome, DatabaseError> {
        self.check_tenant(company_id)?;
        let now = Utc::now();
        let hash = request_hash(body)?;
        let expires_at = now + Duration::hours(i64::from(self.settings().idempotency_ttl_hours));

        self.db()
            .execute_with(
                "DELETE FROM api_request_deduplication
                 WHERE idempotency_key = ?1 AND julianday(expires_at) <= julianday(?2)",
                || libsql::params![idempotency_key, now.to_rfc3339()],
            )
            .await?;

        let id = self.db().generate_id(PREFIX_IDEMPOTENCY).await?;
        let inserted = self
            .db()
            .execute_with(
                "INSERT INTO api_request_deduplication (id, idempotency_key, company_id, endpoint,
                     request_hash, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(idempotency_key) DO NOTHING",
                || {
                    libsql::params![
                        id.as_str(),
                        idempotency_key,
                        company_id,
                        endpoint,
                        hash.as_str(),
                        now.to_rfc3339(),
                        expires_at.to_rfc3339()
                    ]
                },
            )
            .await?;

        if inserted == 1 {
            return Ok(IdempotencyOutcome::Fresh(ApiRequestRecord {
                id,
                idempotency_key: idempotency_key.to_string(),
                company_id: company_id.to_string(),
                endpoint: endpoint.to_string(),
                request_hash: hash,
                response_status: None,
                response_body: None,
                created_at: now,
                expires_at,
            }));
        }

        let Some(existing) = self.find_request(company_id, idempotency_key).await? else {
            tracing::warn!(idempotency_key, endpoint, "idempotency key held by another tenant");
            return Ok(IdempotencyOutcome::Conflict);
        };
        if existing.endpoint != endpoint || existing.request_hash != hash {
            tracing::warn!(idempotency_key, endpoint, "idempotency key reused with another request");
            return Ok(IdempotencyOutcome::Conflict);
        }
        Ok(match existing.response_status {
            None => IdempotencyOutcome::InFlight,
            Some(status) => IdempotencyOutcome::Replay {
                status,
                body: existing.response_body,
            },
        })
    }

    /// Store the response of a request started with `begin_request`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TenantMismatch` when the actor belongs to
    /// another company, and `DatabaseError::InvalidState` if the key has no
    /// in-flight request for `company_id`.
    pub async fn complete_request(
        &self,
        company_id: &str,
        idempotency_key: &str,
        status: u16,
        body: Option<&Value>,
    ) -> Result<ApiRequestRecord, DatabaseError> {
        self.check_tenant(company_id)?;
        let body_text = to_opt_json_text(body)?;
        let changed = self
            .db()
            .execute_with(
                "UPDATE api_request_deduplication SET response_status = ?1, response_body = ?2
                 WHERE idempotency_key = ?3 AND company_id = ?4 AND response_status IS NULL",
                || {
                    libsql::params![
                        i64::from(status),
                        body_text.as_deref(),
                        idempotency_key,
                        company_id
                    ]
                },
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::InvalidState(format!(
                "no in-flight request for idempotency key {idempotency_key}"
            )));
        }
        self.find_request(company_id, idempotency_key)
            .await?
            .ok_or(DatabaseError::NoResult)
    }

    /// Drop the in-flight row so the client can retry, e.g. after the
    /// handler crashed before producing a response.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TenantMismatch` when the actor belongs to
    /// another company.
    pub async fn abandon_request(
        &self,
        company_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, DatabaseError> {
        self.check_tenant(company_id)?;
        let removed = self
            .db()
            .execute_with(
                "DELETE FROM api_request_deduplication
                 WHERE idempotency_key = ?1 AND company_id = ?2 AND response_status IS NULL",
                || [idempotency_key, company_id],
            )
            .await?;
        Ok(removed > 0)
    }

    async fn find_request(
        &self,
        company_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<ApiRequestRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM api_request_deduplication
                     WHERE idempotency_key = ?1 AND company_id = ?2"
                ),
                || [idempotency_key, company_id],
            )
            .await?;
        rows.next().await?.map(|row| row_to_request(&row)).transpose()
    }

    /// Delete stored requests that expired before `now`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the DELETE fails.
    pub async fn purge_expired_requests(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let removed = self
            .db()
            .execute_with(
                "DELETE FROM api_request_deduplication WHERE julianday(expires_at) <= julianday(?1)",
                || [now.to_rfc3339()],
            )
            .await?;
        if removed > 0 {
            tracing::info!(removed, "purged expired idempotency keys");
        }
        Ok(removed)
    }
}
