use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::ConsentPurpose;

/// Encrypted personal data for one user.
///
/// Fields hold ciphertext produced by the external key service; this crate
/// never sees plaintext. `encryption_key_id` names the key version used.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PiiVaultRecord {
    pub id: String,
    pub user_id: String,
    pub company_id: String,
    pub encrypted_email: Option<String>,
    pub encrypted_phone: Option<String>,
    pub encrypted_address: Option<String>,
    pub encryption_key_id: String,
    /// After this instant the record is due for erasure.
    pub purge_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A GDPR consent decision. Withdrawal stamps `withdrawn_at`; the row is kept
/// as evidence of the original grant.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ConsentRecord {
    pub id: String,
    pub user_id: String,
    pub company_id: String,
    pub purpose: ConsentPurpose,
    pub granted: bool,
    pub policy_version: String,
    /// Where consent was captured, e.g. `signup_form`.
    pub source: Option<String>,
    pub granted_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
