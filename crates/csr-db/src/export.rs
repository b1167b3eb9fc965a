//! JSONL export of evidence chains.
//!
//! One file per chain, `{dir}/{evidence_id}.jsonl`, one `LedgerEntry` per
//! line in version order. An exported file can be re-verified offline with
//! [`verify_chain_export`] without a database.

use std::path::{Path, PathBuf};

use serde_json::json;

use csr_core::entities::LedgerEntry;
use csr_core::enums::{LedgerOperation, LedgerOutcome};
use csr_core::ledger::{ChainReport, verify_chain};
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::service::CsrService;

/// Summary of one exported chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainExport {
    pub evidence_id: String,
    pub path: PathBuf,
    pub entries_written: u64,
    pub head_digest: Option<String>,
}

/// Evidence ids become file names, so they must not carry path syntax.
fn is_safe_file_stem(evidence_id: &str) -> bool {
    !evidence_id.is_empty()
        && !evidence_id.starts_with('.')
        && evidence_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl CsrService {
    /// Write a chain to `{dir}/{evidence_id}.jsonl`, replacing an earlier
    /// export, and log the export in the ledger audit log.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the chain does not exist,
    /// `DatabaseError::Validation` if the evidence id is not usable as a file
    /// name, and `DatabaseError::Other` on I/O failure.
    pub async fn export_evidence_chain(
        &self,
        evidence_id: &str,
        dir: &Path,
    ) -> Result<ChainExport, DatabaseError> {
        if !is_safe_file_stem(evidence_id) {
            return Err(DatabaseError::Validation(vec![ValidationIssue::new(
                "evidence_id",
                "cannot be used as an export file name",
            )]));
        }
        let chain = self.fetch_chain(evidence_id).await?;
        let company_id = chain
            .first()
            .map(|e| e.company_id.clone())
            .ok_or(DatabaseError::NoResult)?;

        std::fs::create_dir_all(dir).map_err(|e| DatabaseError::Other(e.into()))?;
        let path = dir.join(format!("{evidence_id}.jsonl"));
        serde_jsonlines::write_json_lines(&path, &chain)
            .map_err(|e| DatabaseError::Other(e.into()))?;

        let export = ChainExport {
            evidence_id: evidence_id.to_string(),
            path,
            entries_written: chain.len() as u64,
            head_digest: chain.last().map(|e| e.content_digest.clone()),
        };
        self.log_ledger_operation(
            &company_id,
            LedgerOperation::Export,
            Some(evidence_id),
            LedgerOutcome::Success,
            Some(json!({
                "entries": export.entries_written,
                "head_digest": export.head_digest,
                "file": export.path.file_name().and_then(|n| n.to_str()),
            })),
        )
        .await?;

        tracing::info!(evidence_id, entries = export.entries_written, "evidence chain exported");
        Ok(export)
    }
}

/// Read an exported chain back.
///
/// # Errors
///
/// Returns `DatabaseError::Other` if the file cannot be read or a line is not
/// a ledger entry.
pub fn read_chain_export(path: &Path) -> Result<Vec<LedgerEntry>, DatabaseError> {
    serde_jsonlines::json_lines(path)
        .map_err(|e| DatabaseError::Other(e.into()))?
        .collect::<Result<Vec<LedgerEntry>, _>>()
        .map_err(|e| DatabaseError::Other(e.into()))
}

/// Verify an exported chain offline. The evidence id is taken from the file
/// stem, so entries of another chain pasted into the file are reported.
///
/// # Errors
///
/// Returns `DatabaseError::Other` if the file cannot be read.
pub fn verify_chain_export<F>(path: &Path, recompute: F) -> Result<ChainReport, DatabaseError>
where
    F: FnMut(&LedgerEntry) -> Option<String>,
{
    let entries = read_chain_export(path)?;
    let evidence_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    Ok(verify_chain(evidence_id, &entries, recompute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use csr_core::enums::{EvidenceType, LedgerEventType};
    use csr_core::ledger::{ChainViolation, content_digest};
    use pretty_assertions::assert_eq;

    use crate::repos::ledger::{EvidenceInput, LedgerAuditFilter};
    use crate::test_support::helpers::{seed_company, test_service};

    async fn seeded_chain(svc: &CsrService, company_id: &str) -> Vec<LedgerEntry> {
        let mut chain = Vec::new();
        for content in ["survey=a", "survey=b", "survey=c"] {
            let input = EvidenceInput::new(
                "evd-survey",
                EvidenceType::SurveyResponse,
                LedgerEventType::Edited,
                content.as_bytes(),
            );
            chain.push(svc.append_evidence(company_id, &input).await.unwrap());
        }
        chain
    }

    #[tokio::test]
    async fn export_reads_back_and_verifies() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let chain = seeded_chain(&svc, &company.id).await;
        let dir = tempfile::tempdir().unwrap();

        let export = svc
            .export_evidence_chain("evd-survey", dir.path())
            .await
            .unwrap();
        assert_eq!(export.entries_written, 3);
        assert_eq!(export.path, dir.path().join("evd-survey.jsonl"));
        assert_eq!(export.head_digest, Some(chain[2].content_digest.clone()));

        assert_eq!(read_chain_export(&export.path).unwrap(), chain);
        assert!(verify_chain_export(&export.path, |_| None).unwrap().is_intact());

        let logged = svc
            .query_ledger_audit(
                &LedgerAuditFilter::for_company(&company.id).operation(LedgerOperation::Export),
            )
            .await
            .unwrap();
        assert_eq!(logged.len(), 1);
    }

    #[tokio::test]
    async fn edited_export_fails_offline_verification() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let mut chain = seeded_chain(&svc, &company.id).await;
        let dir = tempfile::tempdir().unwrap();
        let export = svc
            .export_evidence_chain("evd-survey", dir.path())
            .await
            .unwrap();

        chain[0].content_digest = content_digest(b"survey=forged");
        serde_jsonlines::write_json_lines(&export.path, &chain).unwrap();

        let report = verify_chain_export(&export.path, |_| None).unwrap();
        assert_eq!(report.tampered_versions(), vec![2]);
        assert!(matches!(
            report.violations[0],
            ChainViolation::PreviousDigestMismatch { version: 2, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_chain_is_not_exported() {
        let svc = test_service().await;
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            svc.export_evidence_chain("evd-none", dir.path()).await,
            Err(DatabaseError::NoResult)
        ));
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let svc = test_service().await;
        let dir = tempfile::tempdir().unwrap();
        for id in ["../escape", "a/b", ".hidden", ""] {
            assert!(matches!(
                svc.export_evidence_chain(id, dir.path()).await,
                Err(DatabaseError::Validation(_))
            ));
        }
    }
}
