//! Public impact pages.
//!
//! Slug lookups are not tenant-scoped: a live page is readable by anyone who
//! knows the slug (and the share token for `token` visibility).

use chrono::Utc;

use csr_core::entities::Publication;
use csr_core::enums::{AuditAction, PublicationStatus, PublicationVisibility, ResourceType};
use csr_core::ids::PREFIX_PUBLICATION;
use csr_core::ledger::content_digest;
use csr_core::shapes::StatusChangedDetail;
use csr_core::validation::ValidationIssue;

use crate::error::DatabaseError;
use crate::helpers::{collect_rows, get_opt_string, parse_datetime, parse_enum, parse_optional_datetime};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, slug, title, description, status, visibility,
     access_token_hash, published_at, view_count, created_by, created_at, updated_at";

/// Fields supplied when creating a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationInput {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub visibility: PublicationVisibility,
    /// Plain share token; only its hash is stored. Required for `Token`.
    pub access_token: Option<String>,
}

impl PublicationInput {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if !is_valid_slug(&self.slug) {
            issues.push(ValidationIssue::new(
                "slug",
                "must be 3-80 lowercase letters, digits or single hyphens",
            ));
        }
        if self.title.trim().is_empty() {
            issues.push(ValidationIssue::new("title", "must not be empty"));
        }
        match (self.visibility, self.access_token.as_deref()) {
            (PublicationVisibility::Token, None) => {
                issues.push(ValidationIssue::new(
                    "access_token",
                    "required for token visibility",
                ));
            }
            (PublicationVisibility::Token, Some(token)) if token.len() < 16 => {
                issues.push(ValidationIssue::new(
                    "access_token",
                    "must be at least 16 characters",
                ));
            }
            _ => {}
        }
        issues
    }
}

fn is_valid_slug(slug: &str) -> bool {
    (3..=80).contains(&slug.len())
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn row_to_publication(row: &libsql::Row) -> Result<Publication, DatabaseError> {
    Ok(Publication {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        slug: row.get::<String>(2)?,
        title: row.get::<String>(3)?,
        description: get_opt_string(row, 4)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        visibility: parse_enum(&row.get::<String>(6)?)?,
        access_token_hash: get_opt_string(row, 7)?,
        published_at: parse_optional_datetime(get_opt_string(row, 8)?.as_deref())?,
        view_count: row.get::<i64>(9)?,
        created_by: get_opt_string(row, 10)?,
        created_at: parse_datetime(&row.get::<String>(11)?)?,
        updated_at: parse_datetime(&row.get::<String>(12)?)?,
    })
}

impl CsrService {
    /// Create a draft publication.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` for a bad slug or a missing share
    /// token, and `DatabaseError::Duplicate` when the slug is taken.
    pub async fn create_publication(
        &self,
        company_id: &str,
        input: &PublicationInput,
    ) -> Result<Publication, DatabaseError> {
        self.check_tenant(company_id)?;
        let issues = input.issues();
        if !issues.is_empty() {
            return Err(DatabaseError::Validation(issues));
        }

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_PUBLICATION).await?;
        let created_by = self.actor().map(|a| a.user_id.clone());
        let token_hash = match input.visibility {
            PublicationVisibility::Token => input
                .access_token
                .as_deref()
                .map(|t| content_digest(t.as_bytes())),
            _ => None,
        };
        let title = input.title.trim().to_string();

        self.db()
            .execute_with(
                "INSERT INTO publications (id, company_id, slug, title, description, status,
                     visibility, access_token_hash, view_count, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'draft', ?6, ?7, 0, ?8, ?9, ?9)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        input.slug.as_str(),
                        title.as_str(),
                        input.description.as_deref(),
                        input.visibility.as_str(),
                        token_hash.as_deref(),
                        created_by.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let publication = Publication {
            id: id.clone(),
            company_id: company_id.to_string(),
            slug: input.slug.clone(),
            title,
            description: input.description.clone(),
            status: PublicationStatus::Draft,
            visibility: input.visibility,
            access_token_hash: token_hash,
            published_at: None,
            view_count: 0,
            created_by,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::Publication,
            &id,
            None,
            Some(serde_json::to_value(&publication)?),
        )
        .await?;

        Ok(publication)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the publication does not exist.
    pub async fn get_publication(&self, id: &str) -> Result<Publication, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM publications WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let publication = row_to_publication(&row)?;
        self.check_tenant(&publication.company_id)?;
        Ok(publication)
    }

    /// Public lookup by slug.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if no publication has this slug.
    pub async fn get_publication_by_slug(&self, slug: &str) -> Result<Publication, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM publications WHERE slug = ?1"),
                || [slug],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_publication(&row)
    }

    /// Whether `token` opens the publication at `slug`. Public and unlisted
    /// pages need no token.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if no publication has this slug.
    pub async fn check_publication_access(
        &self,
        slug: &str,
        token: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let publication = self.get_publication_by_slug(slug).await?;
        if publication.status != PublicationStatus::Live {
            return Ok(false);
        }
        Ok(match publication.visibility {
            PublicationVisibility::Public | PublicationVisibility::Unlisted => true,
            PublicationVisibility::Token => match (token, publication.access_token_hash) {
                (Some(token), Some(hash)) => content_digest(token.as_bytes()) == hash,
                _ => false,
            },
        })
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_publications(
        &self,
        company_id: &str,
        status: Option<PublicationStatus>,
    ) -> Result<Vec<Publication>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM publications
                     WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY julianday(created_at) DESC, rowid DESC"
                ),
                || libsql::params![company_id, status.map(PublicationStatus::as_str)],
            )
            .await?;
        collect_rows(rows, row_to_publication).await
    }

    /// Publish or archive. The first move to `Live` stamps `published_at`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the transition is not allowed.
    pub async fn transition_publication(
        &self,
        id: &str,
        to: PublicationStatus,
    ) -> Result<Publication, DatabaseError> {
        let current = self.get_publication(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition publication {id} from {} to {to}",
                current.status
            )));
        }

        let now = Utc::now();
        let published_at = match (to, current.published_at) {
            (PublicationStatus::Live, None) => Some(now),
            (_, existing) => existing,
        };
        self.db()
            .execute_with(
                "UPDATE publications SET status = ?1, published_at = ?2, updated_at = ?3
                 WHERE id = ?4",
                || {
                    libsql::params![
                        to.as_str(),
                        published_at.map(|t| t.to_rfc3339()),
                        now.to_rfc3339(),
                        id
                    ]
                },
            )
            .await?;

        let detail = StatusChangedDetail {
            from: current.status.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: None,
        };
        self.record_audit(
            &current.company_id,
            AuditAction::StatusChanged,
            ResourceType::Publication,
            id,
            None,
            Some(serde_json::to_value(&detail)?),
        )
        .await?;

        Ok(Publication {
            status: to,
            published_at,
            updated_at: now,
            ..current
        })
    }

    /// Count one view of a live publication and return the new total.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the publication is not live.
    pub async fn record_publication_view(&self, slug: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                "UPDATE publications SET view_count = view_count + 1
                 WHERE slug = ?1 AND status = 'live'
                 RETURNING view_count",
                || [slug],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Err(DatabaseError::InvalidState(format!(
                "publication {slug} is not live"
            ))),
        }
    }
}
