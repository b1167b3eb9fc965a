//! # csr-config
//!
//! Layered configuration loading for the CSR persistence workspace using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`CSR_*` prefix, `__` as separator)
//! 2. Project-level `.csr/config.toml`
//! 3. User-level `~/.config/csr/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `CSR_DATABASE__URL` -> `database.url`,
//! `CSR_LEDGER__DEFAULT_RETENTION_DAYS` -> `ledger.default_retention_days`, etc.
//! The `__` (double underscore) separates nested config sections.
//!
//! # Usage
//!
//! ```no_run
//! use csr_config::CsrConfig;
//!
//! let config = CsrConfig::load_with_dotenv().expect("config");
//!
//! if config.database.is_remote() {
//!     println!("Replicating from {}", config.database.url);
//! }
//! ```

mod database;
mod dedup;
mod error;
mod general;
mod ledger;

pub use database::DatabaseConfig;
pub use dedup::DedupConfig;
pub use error::ConfigError;
pub use general::GeneralConfig;
pub use ledger::LedgerConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "CSR_";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CsrConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

impl CsrConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy`; use [`Self::load_with_dotenv`] for `.env` loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Figment` if a source cannot be parsed, and
    /// `ConfigError::InvalidValue` if the merged values fail [`Self::check`].
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment().extract()?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration with `.env` file support.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`].
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_dotenv_from_workspace();
        Self::load()
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment or layer extra providers on top.
    #[must_use]
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = PathBuf::from(".csr/config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field,
    /// or `ConfigError::NotConfigured` when a remote URL has no auth token.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.database.is_remote() && self.database.auth_token.is_empty() {
            return Err(ConfigError::NotConfigured {
                section: "database".into(),
            });
        }
        if self.database.is_remote() && !self.database.has_local_replica() {
            return Err(ConfigError::InvalidValue {
                field: "database.local_replica_path".into(),
                reason: "a remote database needs a local replica path".into(),
            });
        }
        if self.dedup.event_ttl_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dedup.event_ttl_hours".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.dedup.idempotency_ttl_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dedup.idempotency_ttl_hours".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.general.default_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "general.default_limit".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("csr").join("config.toml"))
    }

    /// Load `.env` from the workspace root, walking up from
    /// `CARGO_MANIFEST_DIR` when it is set. Silently does nothing if no
    /// `.env` is found.
    fn load_dotenv_from_workspace() {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let mut dir = PathBuf::from(manifest_dir);
            // crate -> crates/ -> workspace
            for _ in 0..3 {
                let env_path = dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let _ = dotenvy::dotenv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_local_and_valid() {
        let config = CsrConfig::default();
        assert!(!config.database.is_remote());
        assert_eq!(config.database.path, ".csr/csr.db");
        assert_eq!(config.general.default_limit, 20);
        assert!(config.check().is_ok());
    }

    #[test]
    fn figment_builds_without_files() {
        figment::Jail::expect_with(|_jail| {
            let config: CsrConfig = CsrConfig::figment().extract()?;
            assert_eq!(config.ledger.default_retention_days, 2555);
            assert_eq!(config.dedup.event_ttl_hours, 168);
            Ok(())
        });
    }

    #[test]
    fn remote_without_token_is_not_configured() {
        let mut config = CsrConfig::default();
        config.database.url = "libsql://csr-prod.turso.io".into();
        config.database.local_replica_path = "./replica.db".into();
        assert!(matches!(
            config.check(),
            Err(ConfigError::NotConfigured { section }) if section == "database"
        ));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = CsrConfig::default();
        config.dedup.idempotency_ttl_hours = 0;
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("dedup.idempotency_ttl_hours"));
    }
}
