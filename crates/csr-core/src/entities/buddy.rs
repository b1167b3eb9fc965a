use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::MatchStatus;

/// A pairing between a participant and a volunteer buddy.
///
/// Participant and buddy ids are opaque ids from the buddy service, not
/// `users` rows.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BuddyMatch {
    pub id: String,
    pub company_id: String,
    pub program_instance_id: Option<String>,
    pub participant_id: String,
    pub buddy_id: String,
    pub status: MatchStatus,
    pub matched_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

/// An event received from the buddy service. `event_id` is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BuddyEvent {
    pub id: String,
    pub event_id: String,
    /// e.g. `match.created`, `session.completed`, `checkin.logged`.
    pub event_type: String,
    pub company_id: String,
    pub match_id: Option<String>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
