//! Per-domain repositories, each an `impl CsrService` block.

pub mod audit;
pub mod beneficiary_group;
pub mod billing;
pub mod buddy;
pub mod campaign;
pub mod company;
pub mod idempotency;
pub mod instance;
pub mod ledger;
pub mod metric;
pub mod nlq;
pub mod notification;
pub mod privacy;
pub mod publication;
pub mod scenario;
pub mod template;
pub mod user;
pub mod webhook;

/// Outcome of an insert arbitrated by a unique key.
///
/// `Duplicate` carries the row that already held the key, so a redelivered
/// event can be acknowledged without processing it again.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded<T> {
    Inserted(T),
    Duplicate(T),
}

impl<T> Recorded<T> {
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Inserted(value) | Self::Duplicate(value) => value,
        }
    }
}
