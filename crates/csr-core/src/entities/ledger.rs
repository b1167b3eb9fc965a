use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{EvidenceType, LedgerEventType, LedgerOperation, LedgerOutcome};
use crate::shapes::LedgerMetadata;

/// One immutable link in an evidence hash chain.
///
/// For a given `evidence_id`, `version` starts at 1 and increases by one per
/// entry, and `previous_digest` equals the prior entry's `content_digest`
/// (`None` on version 1). Rows are never updated except for the verifier
/// raising `tamper_detected`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub evidence_id: String,
    pub evidence_type: EvidenceType,
    pub company_id: String,
    /// 64-char lowercase hex SHA-256 of the evidential content.
    pub content_digest: String,
    pub previous_digest: Option<String>,
    pub version: i64,
    pub event_type: LedgerEventType,
    pub editor_id: Option<String>,
    pub editor_role: Option<String>,
    pub report_id: Option<String>,
    pub lineage_id: Option<String>,
    pub tamper_detected: bool,
    pub tamper_details: Option<String>,
    /// System time of insertion.
    pub recorded_at: DateTime<Utc>,
    /// Caller-supplied semantic time of the change.
    pub effective_at: DateTime<Utc>,
    pub retention_until: Option<DateTime<Utc>>,
    /// Salted hash of the client IP, never the raw address.
    pub ip_hash: Option<String>,
    pub user_agent_hash: Option<String>,
    pub metadata: Option<LedgerMetadata>,
}

/// Who touched the ledger and how, independent of ledger content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LedgerAuditEntry {
    pub id: String,
    pub company_id: String,
    pub operation: LedgerOperation,
    pub evidence_id: Option<String>,
    pub ledger_entry_id: Option<String>,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub outcome: LedgerOutcome,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
