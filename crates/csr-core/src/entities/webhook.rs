use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{DeliveryStatus, WebhookSource};

/// An inbound webhook delivery. The unique `delivery_id` guarantees at most one
/// row, and therefore at most one processor, per upstream delivery.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ImpactDelivery {
    pub id: String,
    pub delivery_id: String,
    pub company_id: String,
    pub source: WebhookSource,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Marker that an event id has been consumed. Expired rows may be purged.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EventDedupRecord {
    pub id: String,
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub processed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Stored outcome of an idempotent API request.
///
/// `response_status` stays `None` while the first request is still in flight.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ApiRequestRecord {
    pub id: String,
    pub idempotency_key: String,
    pub company_id: String,
    pub endpoint: String,
    /// SHA-256 hex of the canonical request body.
    pub request_hash: String,
    pub response_status: Option<i64>,
    pub response_body: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
