//! Evidence-ledger settings.

use serde::{Deserialize, Serialize};

/// Seven years.
const fn default_retention_days() -> u32 {
    2555
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Retention applied to appended entries that carry no explicit
    /// `retention_until`. `0` means keep forever.
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,

    /// Walk the existing chain before each append and refuse to extend a
    /// chain that is already broken.
    #[serde(default)]
    pub verify_on_append: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_retention_days: default_retention_days(),
            verify_on_append: false,
        }
    }
}

impl LedgerConfig {
    /// Retention in days, `None` when entries are kept forever.
    #[must_use]
    pub const fn retention_days(&self) -> Option<u32> {
        if self.default_retention_days == 0 {
            None
        } else {
            Some(self.default_retention_days)
        }
    }
}
