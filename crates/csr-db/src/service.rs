//! Service layer orchestrating database mutations with the tenant audit log.
//!
//! `CsrService` wraps `CsrDb` (raw database access), `SchemaRegistry` (input
//! validation), and the acting [`Actor`]. All repo methods are implemented as
//! `impl CsrService` blocks under `repos/`.

use chrono::Utc;
use serde_json::Value;

use csr_config::CsrConfig;
use csr_core::entities::AuditLogEntry;
use csr_core::enums::{AuditAction, ResourceType};
use csr_core::identity::Actor;
use csr_core::ids::PREFIX_AUDIT;
use csr_schema::SchemaRegistry;

use crate::CsrDb;
use crate::error::DatabaseError;

/// Tunables the repositories read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Default ledger retention; `None` keeps evidence forever.
    pub retention_days: Option<u32>,
    pub verify_on_append: bool,
    pub event_ttl_hours: u32,
    pub idempotency_ttl_hours: u32,
    pub default_limit: u32,
}

impl ServiceSettings {
    #[must_use]
    pub const fn from_config(config: &CsrConfig) -> Self {
        Self {
            retention_days: config.ledger.retention_days(),
            verify_on_append: config.ledger.verify_on_append,
            event_ttl_hours: config.dedup.event_ttl_hours,
            idempotency_ttl_hours: config.dedup.idempotency_ttl_hours,
            default_limit: config.general.default_limit,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&CsrConfig::default())
    }
}

/// Orchestrates database mutations with the tenant audit log.
///
/// Every mutation method follows this protocol:
/// 1. Check the actor may act on the target company
/// 2. Validate input (schema registry and `Validate` refinements)
/// 3. Execute SQL
/// 4. Append an `audit_logs` row attributed to the actor
pub struct CsrService {
    db: CsrDb,
    schema: SchemaRegistry,
    settings: ServiceSettings,
    actor: Option<Actor>,
}

impl CsrService {
    /// Open the database described by `config` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or migrated.
    pub async fn open(config: &CsrConfig) -> Result<Self, DatabaseError> {
        let db = CsrDb::open(&config.database).await?;
        Ok(Self::new(db, config))
    }

    #[must_use]
    pub fn new(db: CsrDb, config: &CsrConfig) -> Self {
        Self {
            db,
            schema: SchemaRegistry::new(),
            settings: ServiceSettings::from_config(config),
            actor: None,
        }
    }

    /// Create from an existing `CsrDb` with default settings (for testing).
    #[must_use]
    pub fn from_db(db: CsrDb) -> Self {
        Self {
            db,
            schema: SchemaRegistry::new(),
            settings: ServiceSettings::default(),
            actor: None,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach the principal every subsequent mutation is attributed to.
    #[must_use]
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub const fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    #[must_use]
    pub const fn db(&self) -> &CsrDb {
        &self.db
    }

    #[must_use]
    pub const fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    #[must_use]
    pub const fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Sync the underlying database with the remote primary.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the sync fails.
    pub async fn sync(&self) -> Result<(), DatabaseError> {
        self.db.sync().await
    }

    /// Reject work on another tenant's rows. Without an actor (system jobs,
    /// tests) every company is reachable.
    pub(crate) fn check_tenant(&self, company_id: &str) -> Result<(), DatabaseError> {
        match &self.actor {
            Some(actor) if actor.company_id != company_id => Err(DatabaseError::TenantMismatch {
                actor_company: actor.company_id.clone(),
                company: company_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn limit_or_default(&self, limit: Option<u32>) -> u32 {
        limit.unwrap_or(self.settings.default_limit)
    }

    /// Build and append an audit row for a mutation by the current actor.
    pub(crate) async fn record_audit(
        &self,
        company_id: &str,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: &str,
        before_state: Option<Value>,
        after_state: Option<Value>,
    ) -> Result<AuditLogEntry, DatabaseError> {
        let entry = AuditLogEntry {
            id: self.db.generate_id(PREFIX_AUDIT).await?,
            company_id: company_id.to_string(),
            actor_user_id: self.actor.as_ref().map(|a| a.user_id.clone()),
            action,
            resource_type,
            resource_id: resource_id.to_string(),
            before_state,
            after_state,
            ip_address: self.actor.as_ref().and_then(|a| a.ip_address.clone()),
            user_agent: self.actor.as_ref().and_then(|a| a.user_agent.clone()),
            created_at: Utc::now(),
        };
        self.append_audit(&entry).await?;
        Ok(entry)
    }
}
