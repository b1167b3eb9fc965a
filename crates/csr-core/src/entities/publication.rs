use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{PublicationStatus, PublicationVisibility};

/// A public impact page built from a company's reported metrics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Publication {
    pub id: String,
    pub company_id: String,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub status: PublicationStatus,
    pub visibility: PublicationVisibility,
    /// Hash of the share token when `visibility == Token`.
    pub access_token_hash: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
