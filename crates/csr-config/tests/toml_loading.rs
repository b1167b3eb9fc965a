//! Integration tests for TOML and environment configuration loading.
//!
//! Uses figment::Jail for sandboxed files and env vars.

use csr_config::{ConfigError, CsrConfig};
use figment::{
    Figment, Jail,
    providers::{Env, Format, Serialized, Toml},
};
use pretty_assertions::assert_eq;

fn from_toml(file: &str) -> Figment {
    Figment::from(Serialized::defaults(CsrConfig::default())).merge(Toml::file(file))
}

#[test]
fn loads_database_config_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[database]
url = "libsql://csr-prod.turso.io"
auth_token = "db-token"
local_replica_path = "./replica.db"
sync_interval_secs = 15
"#,
        )?;

        let config: CsrConfig = from_toml("config.toml").extract()?;

        assert_eq!(config.database.url, "libsql://csr-prod.turso.io");
        assert_eq!(config.database.auth_token, "db-token");
        assert_eq!(config.database.local_replica_path, "./replica.db");
        assert_eq!(config.database.sync_interval_secs, 15);
        assert_eq!(config.database.path, ".csr/csr.db");
        assert!(config.database.is_remote());
        assert!(config.check().is_ok());
        Ok(())
    });
}

#[test]
fn loads_ledger_and_dedup_sections() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r"
[ledger]
default_retention_days = 3650
verify_on_append = true

[dedup]
event_ttl_hours = 48
idempotency_ttl_hours = 12

[general]
default_limit = 50
",
        )?;

        let config: CsrConfig = from_toml("config.toml").extract()?;

        assert_eq!(config.ledger.default_retention_days, 3650);
        assert!(config.ledger.verify_on_append);
        assert_eq!(config.dedup.event_ttl_hours, 48);
        assert_eq!(config.dedup.idempotency_ttl_hours, 12);
        assert_eq!(config.general.default_limit, 50);
        Ok(())
    });
}

#[test]
fn partial_section_keeps_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[dedup]\nevent_ttl_hours = 6\n")?;

        let config: CsrConfig = from_toml("config.toml").extract()?;

        assert_eq!(config.dedup.event_ttl_hours, 6);
        assert_eq!(config.dedup.idempotency_ttl_hours, 24);
        assert_eq!(config.ledger.default_retention_days, 2555);
        Ok(())
    });
}

#[test]
fn env_overrides_toml() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[general]\ndefault_limit = 50\n")?;
        jail.set_env("CSR_GENERAL__DEFAULT_LIMIT", "75");
        jail.set_env("CSR_LEDGER__VERIFY_ON_APPEND", "true");

        let config: CsrConfig = from_toml("config.toml")
            .merge(Env::prefixed("CSR_").split("__"))
            .extract()?;

        assert_eq!(config.general.default_limit, 75);
        assert!(config.ledger.verify_on_append);
        Ok(())
    });
}

#[test]
fn project_config_file_is_picked_up_by_load() {
    Jail::expect_with(|jail| {
        jail.create_dir(".csr")?;
        jail.create_file(
            ".csr/config.toml",
            "[database]\npath = \"data/impact.db\"\n",
        )?;

        let config = CsrConfig::load().expect("config loads");
        assert_eq!(config.database.path, "data/impact.db");
        Ok(())
    });
}

#[test]
fn load_rejects_remote_without_replica() {
    Jail::expect_with(|jail| {
        jail.set_env("CSR_DATABASE__URL", "libsql://csr-dev.turso.io");
        jail.set_env("CSR_DATABASE__AUTH_TOKEN", "token");

        let err = CsrConfig::load().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. }
            if field == "database.local_replica_path"));
        Ok(())
    });
}

#[test]
fn malformed_value_is_a_figment_error() {
    Jail::expect_with(|jail| {
        jail.set_env("CSR_DEDUP__EVENT_TTL_HOURS", "forever");

        let err = CsrConfig::load().unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
        Ok(())
    });
}
