//! Time-to-live of deduplication records.

use serde::{Deserialize, Serialize};

const fn default_event_ttl_hours() -> u32 {
    168
}

const fn default_idempotency_ttl_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupConfig {
    /// How long a claimed event id blocks redelivery.
    #[serde(default = "default_event_ttl_hours")]
    pub event_ttl_hours: u32,

    /// How long a stored API response is replayed for its idempotency key.
    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            event_ttl_hours: default_event_ttl_hours(),
            idempotency_ttl_hours: default_idempotency_ttl_hours(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        let config = DedupConfig::default();
        assert_eq!(config.event_ttl_hours, 168);
        assert_eq!(config.idempotency_ttl_hours, 24);
    }
}
