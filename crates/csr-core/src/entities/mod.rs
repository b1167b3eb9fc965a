//! Entity structs for every table in the CSR schema.
//!
//! Each entity maps to one table in `crates/csr-db/migrations`. All structs
//! derive `Serialize`, `Deserialize`, and `JsonSchema` for JSON roundtrip and
//! schema validation. Entities carrying `f64` scores derive `PartialEq` only.

mod audit;
mod billing;
mod buddy;
mod company;
mod ledger;
mod metric;
mod nlq;
mod notification;
mod privacy;
mod program;
mod publication;
mod scenario;
mod user;
mod webhook;

pub use audit::AuditLogEntry;
pub use billing::{EntitlementPolicy, Subscription};
pub use buddy::{BuddyEvent, BuddyMatch};
pub use company::Company;
pub use ledger::{LedgerAuditEntry, LedgerEntry};
pub use metric::MetricSnapshot;
pub use nlq::{NlqQuery, NlqSafetyCheck};
pub use notification::Notification;
pub use privacy::{ConsentRecord, PiiVaultRecord};
pub use program::{BeneficiaryGroup, Campaign, ProgramInstance, ProgramTemplate};
pub use publication::Publication;
pub use scenario::Scenario;
pub use user::User;
pub use webhook::{ApiRequestRecord, EventDedupRecord, ImpactDelivery};
