//! Evidence-ledger digests and hash-chain verification.
//!
//! A chain is the set of [`LedgerEntry`] rows sharing one `evidence_id`,
//! ordered by `version`. [`verify_chain`] walks it and reports every broken
//! link; it never mutates anything. Flagging entries as tampered is the
//! database layer's job.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entities::LedgerEntry;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 of `content`, lowercase hex.
#[must_use]
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Whether `digest` is 64 lowercase hex characters.
#[must_use]
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == DIGEST_HEX_LEN
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Version and previous digest the next entry must carry, given the current
/// chain head.
#[must_use]
pub fn next_link(head: Option<&LedgerEntry>) -> (i64, Option<String>) {
    head.map_or((1, None), |h| (h.version + 1, Some(h.content_digest.clone())))
}

/// A broken link found while walking a chain.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainViolation {
    /// Versions are not `1, 2, 3, ...` without gaps.
    VersionGap { expected: i64, found: i64 },
    /// The first entry points at a predecessor.
    UnexpectedPreviousDigest { version: i64 },
    /// `previous_digest` does not equal the predecessor's `content_digest`.
    PreviousDigestMismatch {
        version: i64,
        expected: String,
        found: Option<String>,
    },
    /// `content_digest` is not a 64-char lowercase hex string.
    MalformedDigest { version: i64 },
    /// Recomputing the digest from the evidence content gave another value.
    ContentMismatch {
        version: i64,
        stored: String,
        recomputed: String,
    },
    /// An entry of another evidence id was mixed into the chain.
    ForeignEntry { version: i64, evidence_id: String },
}

impl ChainViolation {
    /// Version of the entry the violation is attributed to.
    #[must_use]
    pub const fn version(&self) -> i64 {
        match self {
            Self::VersionGap { found: version, .. }
            | Self::UnexpectedPreviousDigest { version }
            | Self::PreviousDigestMismatch { version, .. }
            | Self::MalformedDigest { version }
            | Self::ContentMismatch { version, .. }
            | Self::ForeignEntry { version, .. } => *version,
        }
    }
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionGap { expected, found } => {
                write!(f, "version gap: expected v{expected}, found v{found}")
            }
            Self::UnexpectedPreviousDigest { version } => {
                write!(f, "v{version}: first entry must not reference a previous digest")
            }
            Self::PreviousDigestMismatch {
                version,
                expected,
                found,
            } => write!(
                f,
                "v{version}: previous digest {} does not match predecessor {expected}",
                found.as_deref().unwrap_or("<none>")
            ),
            Self::MalformedDigest { version } => {
                write!(f, "v{version}: content digest is not 64 lowercase hex chars")
            }
            Self::ContentMismatch {
                version,
                stored,
                recomputed,
            } => write!(
                f,
                "v{version}: stored digest {stored} but content hashes to {recomputed}"
            ),
            Self::ForeignEntry {
                version,
                evidence_id,
            } => write!(f, "v{version}: entry belongs to evidence {evidence_id}"),
        }
    }
}

/// Outcome of walking one evidence chain.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ChainReport {
    pub evidence_id: String,
    pub entries_checked: u64,
    /// `content_digest` of the highest version, if any.
    pub head_digest: Option<String>,
    pub violations: Vec<ChainViolation>,
}

impl ChainReport {
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.violations.is_empty()
    }

    /// Distinct versions with at least one violation, ascending.
    #[must_use]
    pub fn tampered_versions(&self) -> Vec<i64> {
        let mut versions: Vec<i64> = self.violations.iter().map(ChainViolation::version).collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    /// Violations attributed to `version`, one line each.
    #[must_use]
    pub fn describe_version(&self, version: i64) -> String {
        self.violations
            .iter()
            .filter(|v| v.version() == version)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Walk a chain and report every broken link.
///
/// `entries` may arrive in any order; they are checked in `version` order.
/// `recompute` returns the digest of the evidence content for an entry when
/// the caller has the content at hand, or `None` to skip the content check for
/// that entry.
pub fn verify_chain<F>(evidence_id: &str, entries: &[LedgerEntry], mut recompute: F) -> ChainReport
where
    F: FnMut(&LedgerEntry) -> Option<String>,
{
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.version);

    let mut violations = Vec::new();
    let mut previous: Option<&LedgerEntry> = None;

    let mut expected_version = 1_i64;
    for entry in ordered.iter().copied() {
        if entry.evidence_id != evidence_id {
            violations.push(ChainViolation::ForeignEntry {
                version: entry.version,
                evidence_id: entry.evidence_id.clone(),
            });
        }
        if entry.version != expected_version {
            violations.push(ChainViolation::VersionGap {
                expected: expected_version,
                found: entry.version,
            });
        }
        // Resync so one missing version does not flag the whole tail.
        expected_version = entry.version + 1;
        if !is_valid_digest(&entry.content_digest) {
            violations.push(ChainViolation::MalformedDigest {
                version: entry.version,
            });
        }

        match previous {
            None => {
                if entry.previous_digest.is_some() {
                    violations.push(ChainViolation::UnexpectedPreviousDigest {
                        version: entry.version,
                    });
                }
            }
            Some(prev) => {
                if entry.previous_digest.as_deref() != Some(prev.content_digest.as_str()) {
                    violations.push(ChainViolation::PreviousDigestMismatch {
                        version: entry.version,
                        expected: prev.content_digest.clone(),
                        found: entry.previous_digest.clone(),
                    });
                }
            }
        }

        if let Some(recomputed) = recompute(entry) {
            if recomputed != entry.content_digest {
                violations.push(ChainViolation::ContentMismatch {
                    version: entry.version,
                    stored: entry.content_digest.clone(),
                    recomputed,
                });
            }
        }

        previous = Some(entry);
    }

    ChainReport {
        evidence_id: evidence_id.to_string(),
        entries_checked: ordered.len() as u64,
        head_digest: ordered.last().map(|e| e.content_digest.clone()),
        violations,
    }
}
