use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::UserRole;

/// The authenticated principal performing a mutation.
///
/// Produced by the (external) API layer and attached to `CsrService` so that
/// every mutation lands in `audit_logs` with an actor. Carries no auth logic.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub company_id: String,
    pub role: UserRole,
    /// Client IP as reported by the edge, if any.
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
