//! Natural-language query log and safety-check results.
//!
//! The NLQ engine itself runs elsewhere. This repository records each
//! question, the outcome of every safety check run against its generated SQL,
//! and how execution ended.

use chrono::Utc;

use csr_core::entities::{NlqQuery, NlqSafetyCheck};
use csr_core::enums::{NlqStatus, SafetyCheck};
use csr_core::ids::{PREFIX_NLQ, PREFIX_SAFETY_CHECK};

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_bool, get_opt_bool, get_opt_string, parse_datetime, parse_enum,
    parse_optional_datetime,
};
use crate::service::CsrService;

const QUERY_COLS: &str = "q.id, q.company_id, q.user_id, q.question, q.normalized_question,
     q.intent, q.generated_sql, q.safety_passed, q.execution_time_ms, q.result_row_count,
     q.cache_hit, q.status, q.error_message, q.created_at, q.completed_at";

const CHECK_COLS: &str = "id, query_id, check_name, passed, details, created_at";

fn row_to_query(row: &libsql::Row) -> Result<NlqQuery, DatabaseError> {
    Ok(NlqQuery {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        user_id: get_opt_string(row, 2)?,
        question: row.get::<String>(3)?,
        normalized_question: get_opt_string(row, 4)?,
        intent: get_opt_string(row, 5)?,
        generated_sql: get_opt_string(row, 6)?,
        safety_passed: get_opt_bool(row, 7)?,
        execution_time_ms: row.get::<Option<i64>>(8)?,
        result_row_count: row.get::<Option<i64>>(9)?,
        cache_hit: get_bool(row, 10)?,
        status: parse_enum(&row.get::<String>(11)?)?,
        error_message: get_opt_string(row, 12)?,
        created_at: parse_datetime(&row.get::<String>(13)?)?,
        completed_at: parse_optional_datetime(get_opt_string(row, 14)?.as_deref())?,
    })
}

fn row_to_check(row: &libsql::Row) -> Result<NlqSafetyCheck, DatabaseError> {
    Ok(NlqSafetyCheck {
        id: row.get::<String>(0)?,
        query_id: row.get::<String>(1)?,
        check: parse_enum(&row.get::<String>(2)?)?,
        passed: get_bool(row, 3)?,
        details: get_opt_string(row, 4)?,
        created_at: parse_datetime(&row.get::<String>(5)?)?,
    })
}

/// A question as received, with what the engine derived from it so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInput {
    pub question: String,
    pub normalized_question: Option<String>,
    pub intent: Option<String>,
    pub generated_sql: Option<String>,
}

/// One safety check result reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyCheckResult {
    pub check: SafetyCheck,
    pub passed: bool,
    pub details: Option<String>,
}

/// How execution of a query ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCompletion {
    /// `Success` or `Failed`; rejection comes from the safety checks.
    pub status: NlqStatus,
    pub execution_time_ms: Option<i64>,
    pub result_row_count: Option<i64>,
    pub cache_hit: bool,
    pub error_message: Option<String>,
}

impl CsrService {
    /// Record a new question as pending, attributed to the acting user.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT fails.
    pub async fn log_query(
        &self,
        company_id: &str,
        input: &QueryInput,
    ) -> Result<NlqQuery, DatabaseError> {
        self.check_tenant(company_id)?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_NLQ).await?;
        let user_id = self.actor().map(|a| a.user_id.clone());

        self.db()
            .execute_with(
                "INSERT INTO nlq_queries (id, company_id, user_id, question, normalized_question,
                     intent, generated_sql, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        user_id.as_deref(),
                        input.question.as_str(),
                        input.normalized_question.as_deref(),
                        input.intent.as_deref(),
                        input.generated_sql.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        Ok(NlqQuery {
            id,
            company_id: company_id.to_string(),
            user_id,
            question: input.question.clone(),
            normalized_question: input.normalized_question.clone(),
            intent: input.intent.clone(),
            generated_sql: input.generated_sql.clone(),
            safety_passed: None,
            execution_time_ms: None,
            result_row_count: None,
            cache_hit: false,
            status: NlqStatus::Pending,
            error_message: None,
            created_at: now,
            completed_at: None,
        })
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the query does not exist.
    pub async fn get_query(&self, id: &str) -> Result<NlqQuery, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {QUERY_COLS} FROM nlq_queries q WHERE q.id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let query = row_to_query(&row)?;
        self.check_tenant(&query.company_id)?;
        Ok(query)
    }

    /// Store the safety checks of a pending query in one transaction and set
    /// `safety_passed`. Any failed check rejects the query.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` unless the query is pending, and
    /// `Duplicate` if a check was already recorded for it.
    pub async fn record_safety_checks(
        &self,
        query_id: &str,
        results: &[SafetyCheckResult],
    ) -> Result<NlqQuery, DatabaseError> {
        let query = self.get_query(query_id).await?;
        if query.status != NlqStatus::Pending {
            return Err(DatabaseError::InvalidState(format!(
                "query {query_id} is {} and takes no more safety checks",
                query.status
            )));
        }

        let mut ids = Vec::with_capacity(results.len());
        for _ in results {
            ids.push(self.db().generate_id(PREFIX_SAFETY_CHECK).await?);
        }

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.check.as_str())
            .collect();
        let passed = failed.is_empty();
        let now = Utc::now().to_rfc3339();

        let tx = self.db().conn().transaction().await?;
        let written = async {
            for (id, result) in ids.iter().zip(results) {
                tx.execute(
                    "INSERT INTO nlq_safety_checks (id, query_id, check_name, passed, details, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    libsql::params![
                        id.as_str(),
                        query_id,
                        result.check.as_str(),
                        i64::from(result.passed),
                        result.details.as_deref(),
                        now.as_str()
                    ],
                )
                .await?;
            }
            if passed {
                tx.execute(
                    "UPDATE nlq_queries SET safety_passed = 1 WHERE id = ?1",
                    [query_id],
                )
                .await?;
            } else {
                tx.execute(
                    "UPDATE nlq_queries
                     SET safety_passed = 0, status = 'rejected', error_message = ?1, completed_at = ?2
                     WHERE id = ?3",
                    libsql::params![
                        format!("failed safety checks: {}", failed.join(", ")),
                        now.as_str(),
                        query_id
                    ],
                )
                .await?;
            }
            Ok::<(), libsql::Error>(())
        }
        .await;
        match written {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        }

        if !passed {
            tracing::warn!(query_id, failed = ?failed, "nlq query rejected by safety checks");
        }
        self.get_query(query_id).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_safety_checks(
        &self,
        query_id: &str,
    ) -> Result<Vec<NlqSafetyCheck>, DatabaseError> {
        self.get_query(query_id).await?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {CHECK_COLS} FROM nlq_safety_checks WHERE query_id = ?1 ORDER BY rowid"
                ),
                || [query_id],
            )
            .await?;
        collect_rows(rows, row_to_check).await
    }

    /// Finish a pending query. Only a query whose safety checks all passed
    /// can succeed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` for a disallowed transition or a
    /// success without passed safety checks.
    pub async fn complete_query(
        &self,
        query_id: &str,
        completion: &QueryCompletion,
    ) -> Result<NlqQuery, DatabaseError> {
        let current = self.get_query(query_id).await?;
        let to = completion.status;
        if to == NlqStatus::Rejected || !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition nlq query {query_id} from {} to {to}",
                current.status
            )));
        }
        if to == NlqStatus::Success && current.safety_passed != Some(true) {
            return Err(DatabaseError::InvalidState(format!(
                "nlq query {query_id} has not passed its safety checks"
            )));
        }

        self.db()
            .execute_with(
                "UPDATE nlq_queries
                 SET status = ?1, execution_time_ms = ?2, result_row_count = ?3, cache_hit = ?4,
                     error_message = ?5, completed_at = ?6
                 WHERE id = ?7",
                || {
                    libsql::params![
                        to.as_str(),
                        completion.execution_time_ms,
                        completion.result_row_count,
                        i64::from(completion.cache_hit),
                        completion.error_message.as_deref(),
                        Utc::now().to_rfc3339(),
                        query_id
                    ]
                },
            )
            .await?;

        self.get_query(query_id).await
    }

    /// Full-text search over a company's questions, best match first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` for a malformed FTS5 expression.
    pub async fn search_queries(
        &self,
        company_id: &str,
        query: &str,
        limit: Option<u32>,
    ) -> Result<Vec<NlqQuery>, DatabaseError> {
        self.check_tenant(company_id)?;
        let limit = self.limit_or_default(limit);
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {QUERY_COLS}
                     FROM nlq_queries_fts
                     JOIN nlq_queries q ON q.rowid = nlq_queries_fts.rowid
                     WHERE nlq_queries_fts MATCH ?1 AND q.company_id = ?2
                     ORDER BY rank LIMIT ?3"
                ),
                || libsql::params![query, company_id, limit],
            )
            .await?;
        collect_rows(rows, row_to_query).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_recent_queries(
        &self,
        company_id: &str,
        status: Option<NlqStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<NlqQuery>, DatabaseError> {
        self.check_tenant(company_id)?;
        let limit = self.limit_or_default(limit);
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {QUERY_COLS} FROM nlq_queries q
                     WHERE q.company_id = ?1 AND (?2 IS NULL OR q.status = ?2)
                     ORDER BY julianday(q.created_at) DESC, q.rowid DESC
                     LIMIT ?3"
                ),
                || libsql::params![company_id, status.map(NlqStatus::as_str), limit],
            )
            .await?;
        collect_rows(rows, row_to_query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::test_support::helpers::{actor_for, seed_company, seed_tenant, test_service};

    fn question(text: &str) -> QueryInput {
        QueryInput {
            question: text.into(),
            normalized_question: Some(text.to_lowercase()),
            intent: Some("metric_lookup".into()),
            generated_sql: Some("SELECT sum(total_hours) FROM program_instances".into()),
        }
    }

    fn all_pass() -> Vec<SafetyCheckResult> {
        [SafetyCheck::SqlInjection, SafetyCheck::TenantIsolation, SafetyCheck::RowLimit]
            .into_iter()
            .map(|check| SafetyCheckResult {
                check,
                passed: true,
                details: None,
            })
            .collect()
    }

    fn success() -> QueryCompletion {
        QueryCompletion {
            status: NlqStatus::Success,
            execution_time_ms: Some(42),
            result_row_count: Some(1),
            cache_hit: false,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn query_is_attributed_to_actor() {
        let svc = test_service().await;
        let (company, user) = seed_tenant(&svc, "acme").await;
        let svc = svc.with_actor(actor_for(&user));
        let query = svc
            .log_query(&company.id, &question("How many volunteer hours in Q1?"))
            .await
            .unwrap();
        assert_eq!(query.user_id.as_deref(), Some(user.id.as_str()));
        assert_eq!(svc.get_query(&query.id).await.unwrap(), query);
    }

    #[tokio::test]
    async fn passing_checks_then_success() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let query = svc
            .log_query(&company.id, &question("Total volunteer hours"))
            .await
            .unwrap();

        let checked = svc.record_safety_checks(&query.id, &all_pass()).await.unwrap();
        assert_eq!(checked.safety_passed, Some(true));
        assert_eq!(checked.status, NlqStatus::Pending);
        assert_eq!(svc.list_safety_checks(&query.id).await.unwrap().len(), 3);

        let done = svc.complete_query(&query.id, &success()).await.unwrap();
        assert_eq!(done.status, NlqStatus::Success);
        assert_eq!(done.execution_time_ms, Some(42));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_check_rejects_query() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let query = svc
            .log_query(&company.id, &question("Show all emails"))
            .await
            .unwrap();

        let mut results = all_pass();
        results.push(SafetyCheckResult {
            check: SafetyCheck::PiiColumns,
            passed: false,
            details: Some("users.email".into()),
        });
        let rejected = svc.record_safety_checks(&query.id, &results).await.unwrap();
        assert_eq!(rejected.status, NlqStatus::Rejected);
        assert_eq!(rejected.safety_passed, Some(false));
        assert_eq!(
            rejected.error_message.as_deref(),
            Some("failed safety checks: pii_columns")
        );

        assert!(matches!(
            svc.complete_query(&query.id, &success()).await,
            Err(DatabaseError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn success_requires_checks() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let query = svc.log_query(&company.id, &question("hours")).await.unwrap();
        assert!(matches!(
            svc.complete_query(&query.id, &success()).await,
            Err(DatabaseError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_check_rolls_back_batch() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let query = svc.log_query(&company.id, &question("hours")).await.unwrap();

        let mut results = all_pass();
        results.push(results[0].clone());
        let err = svc.record_safety_checks(&query.id, &results).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref table, .. } if table == "nlq_safety_checks"));

        assert!(svc.list_safety_checks(&query.id).await.unwrap().is_empty());
        assert_eq!(svc.get_query(&query.id).await.unwrap().safety_passed, None);
    }

    #[tokio::test]
    async fn search_matches_stemmed_words_within_tenant() {
        let svc = test_service().await;
        let acme = seed_company(&svc, "acme").await;
        let globex = seed_company(&svc, "globex").await;
        svc.log_query(&acme.id, &question("How many volunteers joined in March?"))
            .await
            .unwrap();
        svc.log_query(&acme.id, &question("Average SROI per program"))
            .await
            .unwrap();
        svc.log_query(&globex.id, &question("Volunteer count by region"))
            .await
            .unwrap();

        let hits = svc.search_queries(&acme.id, "volunteer", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].question.contains("volunteers"));
    }

    #[tokio::test]
    async fn recent_queries_newest_first() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let first = svc.log_query(&company.id, &question("first")).await.unwrap();
        let second = svc.log_query(&company.id, &question("second")).await.unwrap();
        svc.record_safety_checks(&first.id, &all_pass()).await.unwrap();
        svc.complete_query(&first.id, &success()).await.unwrap();

        let recent = svc.list_recent_queries(&company.id, None, Some(10)).await.unwrap();
        assert_eq!(recent[0].id, second.id);

        let done = svc
            .list_recent_queries(&company.id, Some(NlqStatus::Success), None)
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, first.id);
    }
}
