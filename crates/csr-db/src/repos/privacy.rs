//! PII vault and GDPR consent repository.
//!
//! The vault holds ciphertext only. Erasure deletes the vault row outright and
//! leaves an `erased` audit entry; consent rows are never deleted, withdrawal
//! stamps `withdrawn_at` on the grant.

use chrono::{DateTime, Utc};

use csr_core::entities::{ConsentRecord, PiiVaultRecord};
use csr_core::enums::{AuditAction, ConsentPurpose, ResourceType};
use csr_core::ids::{PREFIX_CONSENT, PREFIX_PII};

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_bool, get_opt_string, parse_datetime, parse_enum, parse_optional_datetime,
};
use crate::service::CsrService;

const PII_COLS: &str = "id, user_id, company_id, encrypted_email, encrypted_phone, encrypted_address,
     encryption_key_id, purge_after, created_at, updated_at";

const CONSENT_COLS: &str = "id, user_id, company_id, purpose, granted, policy_version, source,
     granted_at, withdrawn_at, created_at";

fn row_to_pii(row: &libsql::Row) -> Result<PiiVaultRecord, DatabaseError> {
    Ok(PiiVaultRecord {
        id: row.get::<String>(0)?,
        user_id: row.get::<String>(1)?,
        company_id: row.get::<String>(2)?,
        encrypted_email: get_opt_string(row, 3)?,
        encrypted_phone: get_opt_string(row, 4)?,
        encrypted_address: get_opt_string(row, 5)?,
        encryption_key_id: row.get::<String>(6)?,
        purge_after: parse_optional_datetime(get_opt_string(row, 7)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
        updated_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

fn row_to_consent(row: &libsql::Row) -> Result<ConsentRecord, DatabaseError> {
    Ok(ConsentRecord {
        id: row.get::<String>(0)?,
        user_id: row.get::<String>(1)?,
        company_id: row.get::<String>(2)?,
        purpose: parse_enum(&row.get::<String>(3)?)?,
        granted: get_bool(row, 4)?,
        policy_version: row.get::<String>(5)?,
        source: get_opt_string(row, 6)?,
        granted_at: parse_optional_datetime(get_opt_string(row, 7)?.as_deref())?,
        withdrawn_at: parse_optional_datetime(get_opt_string(row, 8)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

/// Ciphertext fields for [`CsrService::store_pii`].
#[derive(Debug, Clone, Default)]
pub struct EncryptedPii {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub encryption_key_id: String,
    pub purge_after: Option<DateTime<Utc>>,
}

impl CsrService {
    /// Insert or replace a user's vault record. The audit row never carries
    /// the ciphertext.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the user is unknown or the write fails.
    pub async fn store_pii(
        &self,
        user_id: &str,
        pii: &EncryptedPii,
    ) -> Result<PiiVaultRecord, DatabaseError> {
        let user = self.get_user(user_id).await?;
        let now = Utc::now();
        let new_id = self.db().generate_id(PREFIX_PII).await?;
        let purge_after = pii.purge_after.map(|t| t.to_rfc3339());

        self.db()
            .execute_with(
                "INSERT INTO pii_vault (id, user_id, company_id, encrypted_email, encrypted_phone,
                     encrypted_address, encryption_key_id, purge_after, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(user_id) DO UPDATE SET
                     encrypted_email = excluded.encrypted_email,
                     encrypted_phone = excluded.encrypted_phone,
                     encrypted_address = excluded.encrypted_address,
                     encryption_key_id = excluded.encryption_key_id,
                     purge_after = excluded.purge_after,
                     updated_at = excluded.updated_at",
                || {
                    libsql::params![
                        new_id.as_str(),
                        user_id,
                        user.company_id.as_str(),
                        pii.email.as_deref(),
                        pii.phone.as_deref(),
                        pii.address.as_deref(),
                        pii.encryption_key_id.as_str(),
                        purge_after.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let record = self.get_pii(user_id).await?;
        let action = if record.id == new_id {
            AuditAction::Created
        } else {
            AuditAction::Updated
        };
        self.record_audit(
            &record.company_id,
            action,
            ResourceType::PiiVault,
            &record.id,
            None,
            Some(serde_json::json!({
                "encryption_key_id": record.encryption_key_id,
                "purge_after": purge_after,
            })),
        )
        .await?;

        Ok(record)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the user has no vault record.
    pub async fn get_pii(&self, user_id: &str) -> Result<PiiVaultRecord, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {PII_COLS} FROM pii_vault WHERE user_id = ?1"),
                || [user_id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let record = row_to_pii(&row)?;
        self.check_tenant(&record.company_id)?;
        Ok(record)
    }

    /// Delete a user's vault record (right to erasure). Returns whether a
    /// record existed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the DELETE fails.
    pub async fn erase_pii(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let record = match self.get_pii(user_id).await {
            Ok(record) => record,
            Err(DatabaseError::NoResult) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.db()
            .execute_with("DELETE FROM pii_vault WHERE id = ?1", || [record.id.as_str()])
            .await?;

        self.record_audit(
            &record.company_id,
            AuditAction::Erased,
            ResourceType::PiiVault,
            &record.id,
            Some(serde_json::json!({ "user_id": record.user_id })),
            None,
        )
        .await?;

        Ok(true)
    }

    /// Vault records whose `purge_after` has passed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_pii_due_for_purge(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PiiVaultRecord>, DatabaseError> {
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {PII_COLS} FROM pii_vault
                     WHERE purge_after IS NOT NULL AND julianday(purge_after) <= julianday(?1)
                     ORDER BY purge_after"
                ),
                || [now.to_rfc3339()],
            )
            .await?;
        collect_rows(rows, row_to_pii).await
    }

    /// Record a consent decision. Every call adds a row; the latest row per
    /// purpose is the user's current position.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the user is unknown or the INSERT fails.
    pub async fn record_consent(
        &self,
        user_id: &str,
        purpose: ConsentPurpose,
        granted: bool,
        policy_version: &str,
        source: Option<&str>,
    ) -> Result<ConsentRecord, DatabaseError> {
        let user = self.get_user(user_id).await?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_CONSENT).await?;
        let granted_at = granted.then_some(now);

        self.db()
            .execute_with(
                "INSERT INTO consent_records (id, user_id, company_id, purpose, granted,
                     policy_version, source, granted_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                || {
                    libsql::params![
                        id.as_str(),
                        user_id,
                        user.company_id.as_str(),
                        purpose.as_str(),
                        i64::from(granted),
                        policy_version,
                        source,
                        granted_at.map(|t| t.to_rfc3339()),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let record = ConsentRecord {
            id: id.clone(),
            user_id: user_id.to_string(),
            company_id: user.company_id.clone(),
            purpose,
            granted,
            policy_version: policy_version.to_string(),
            source: source.map(String::from),
            granted_at,
            withdrawn_at: None,
            created_at: now,
        };

        let action = if granted {
            AuditAction::ConsentGranted
        } else {
            AuditAction::ConsentWithdrawn
        };
        self.record_audit(
            &user.company_id,
            action,
            ResourceType::Consent,
            &id,
            None,
            Some(serde_json::to_value(&record)?),
        )
        .await?;

        Ok(record)
    }

    /// Withdraw the user's current grant for `purpose`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if there is no active grant.
    pub async fn withdraw_consent(
        &self,
        user_id: &str,
        purpose: ConsentPurpose,
    ) -> Result<ConsentRecord, DatabaseError> {
        let current = self.current_consent(user_id, purpose).await?;
        let Some(current) = current.filter(|c| c.granted && c.withdrawn_at.is_none()) else {
            return Err(DatabaseError::InvalidState(format!(
                "user {user_id} has no active {purpose} consent"
            )));
        };

        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE consent_records SET withdrawn_at = ?1 WHERE id = ?2",
                || libsql::params![now.to_rfc3339(), current.id.as_str()],
            )
            .await?;

        let record = ConsentRecord {
            withdrawn_at: Some(now),
            ..current
        };
        self.record_audit(
            &record.company_id,
            AuditAction::ConsentWithdrawn,
            ResourceType::Consent,
            &record.id,
            None,
            Some(serde_json::json!({ "withdrawn_at": now.to_rfc3339() })),
        )
        .await?;

        Ok(record)
    }

    /// Most recent consent row for a purpose, if any.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn current_consent(
        &self,
        user_id: &str,
        purpose: ConsentPurpose,
    ) -> Result<Option<ConsentRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {CONSENT_COLS} FROM consent_records
                     WHERE user_id = ?1 AND purpose = ?2
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                || libsql::params![user_id, purpose.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let record = row_to_consent(&row)?;
                self.check_tenant(&record.company_id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Whether the user currently consents to `purpose`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn has_consent(
        &self,
        user_id: &str,
        purpose: ConsentPurpose,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .current_consent(user_id, purpose)
            .await?
            .is_some_and(|c| c.granted && c.withdrawn_at.is_none()))
    }

    /// Full consent history of a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_consents(&self, user_id: &str) -> Result<Vec<ConsentRecord>, DatabaseError> {
        let user = self.get_user(user_id).await?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {CONSENT_COLS} FROM consent_records
                     WHERE user_id = ?1 ORDER BY created_at, rowid"
                ),
                || [user.id.as_str()],
            )
            .await?;
        collect_rows(rows, row_to_consent).await
    }
}
