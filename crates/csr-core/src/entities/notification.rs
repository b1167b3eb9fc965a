use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{NotificationChannel, NotificationStatus};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub company_id: String,
    pub user_id: String,
    pub channel: NotificationChannel,
    /// Template key, e.g. `campaign.invite`.
    pub template: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
