//! libSQL database configuration.

use serde::{Deserialize, Serialize};

fn default_path() -> String {
    ".csr/csr.db".to_string()
}

const fn default_sync_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Local database file used when no remote URL is set.
    /// `:memory:` opens a throwaway in-memory database.
    #[serde(default = "default_path")]
    pub path: String,

    /// Remote primary URL (e.g. `libsql://csr-prod.turso.io`).
    #[serde(default)]
    pub url: String,

    /// Auth token for the remote primary.
    #[serde(default)]
    pub auth_token: String,

    /// Embedded replica file kept in sync with the remote primary.
    #[serde(default)]
    pub local_replica_path: String,

    /// Background sync interval for embedded replicas, in seconds.
    /// `0` disables periodic sync; callers then sync explicitly.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            url: String::new(),
            auth_token: String::new(),
            local_replica_path: String::new(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Whether a remote primary is configured.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !self.url.is_empty()
    }

    #[must_use]
    pub fn has_local_replica(&self) -> bool {
        !self.local_replica_path.is_empty()
    }

    /// Whether the local path names an in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_local_file() {
        let config = DatabaseConfig::default();
        assert!(!config.is_remote());
        assert!(!config.has_local_replica());
        assert!(!config.is_in_memory());
        assert_eq!(config.sync_interval_secs, 60);
    }

    #[test]
    fn remote_with_replica() {
        let config = DatabaseConfig {
            url: "libsql://csr-dev.turso.io".into(),
            auth_token: "token".into(),
            local_replica_path: "./replica.db".into(),
            ..Default::default()
        };
        assert!(config.is_remote());
        assert!(config.has_local_replica());
    }

    #[test]
    fn memory_path_detected() {
        let config = DatabaseConfig {
            path: ":memory:".into(),
            ..Default::default()
        };
        assert!(config.is_in_memory());
    }
}
