//! Beneficiary group repository.
//!
//! Inputs pass the `Validate` refinements (age range, group size bounds, no
//! email addresses in free text) before any SQL runs. The table's CHECK
//! constraints repeat the numeric bounds so rows written around the service
//! are held to the same rules.

use chrono::Utc;

use csr_core::entities::BeneficiaryGroup;
use csr_core::enums::{AuditAction, ResourceType};
use csr_core::ids::PREFIX_BENEFICIARY_GROUP;
use csr_core::validation::{
    CreateBeneficiaryGroupInput, UpdateBeneficiaryGroupInput, Validate, group_bound_issues,
};

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_bool, get_opt_string, parse_datetime, parse_enum, parse_json, to_json_text,
};
use crate::service::CsrService;

const SELECT_COLS: &str = "id, company_id, name, description, group_type, country_code, region,
     age_range_min, age_range_max, min_group_size, max_group_size, primary_languages, tags,
     internal_notes, is_active, created_by, created_at, updated_at";

fn row_to_group(row: &libsql::Row) -> Result<BeneficiaryGroup, DatabaseError> {
    Ok(BeneficiaryGroup {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        name: row.get::<String>(2)?,
        description: get_opt_string(row, 3)?,
        group_type: parse_enum(&row.get::<String>(4)?)?,
        country_code: row.get::<String>(5)?,
        region: get_opt_string(row, 6)?,
        age_range_min: row.get::<Option<i64>>(7)?,
        age_range_max: row.get::<Option<i64>>(8)?,
        min_group_size: row.get::<Option<i64>>(9)?,
        max_group_size: row.get::<Option<i64>>(10)?,
        primary_languages: parse_json(&row.get::<String>(11)?)?,
        tags: parse_json(&row.get::<String>(12)?)?,
        internal_notes: get_opt_string(row, 13)?,
        is_active: get_bool(row, 14)?,
        created_by: get_opt_string(row, 15)?,
        created_at: parse_datetime(&row.get::<String>(16)?)?,
        updated_at: parse_datetime(&row.get::<String>(17)?)?,
    })
}

impl CsrService {
    /// Create a group from an already-typed input.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` with every failed rule.
    pub async fn create_beneficiary_group(
        &self,
        company_id: &str,
        input: &CreateBeneficiaryGroupInput,
    ) -> Result<BeneficiaryGroup, DatabaseError> {
        self.check_tenant(company_id)?;
        input.validate()?;

        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_BENEFICIARY_GROUP).await?;
        let created_by = self.actor().map(|a| a.user_id.clone());
        let languages = to_json_text(&input.primary_languages)?;
        let tags = to_json_text(&input.tags)?;
        let name = input.name.trim().to_string();

        self.db()
            .execute_with(
                "INSERT INTO beneficiary_groups (id, company_id, name, description, group_type,
                     country_code, region, age_range_min, age_range_max, min_group_size,
                     max_group_size, primary_languages, tags, internal_notes, is_active,
                     created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 1, ?15, ?16, ?16)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        name.as_str(),
                        input.description.as_deref(),
                        input.group_type.as_str(),
                        input.country_code.as_str(),
                        input.region.as_deref(),
                        input.age_range.map(|r| r.min),
                        input.age_range.map(|r| r.max),
                        input.min_group_size,
                        input.max_group_size,
                        languages.as_str(),
                        tags.as_str(),
                        input.internal_notes.as_deref(),
                        created_by.as_deref(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let group = BeneficiaryGroup {
            id: id.clone(),
            company_id: company_id.to_string(),
            name,
            description: input.description.clone(),
            group_type: input.group_type,
            country_code: input.country_code.clone(),
            region: input.region.clone(),
            age_range_min: input.age_range.map(|r| r.min),
            age_range_max: input.age_range.map(|r| r.max),
            min_group_size: input.min_group_size,
            max_group_size: input.max_group_size,
            primary_languages: input.primary_languages.clone(),
            tags: input.tags.clone(),
            internal_notes: input.internal_notes.clone(),
            is_active: true,
            created_by,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::BeneficiaryGroup,
            &id,
            None,
            Some(serde_json::to_value(&group)?),
        )
        .await?;

        Ok(group)
    }

    /// Create a group from a raw API payload: JSON Schema first, then the
    /// refinements.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` for schema or refinement failures.
    pub async fn create_beneficiary_group_from_json(
        &self,
        company_id: &str,
        payload: serde_json::Value,
    ) -> Result<BeneficiaryGroup, DatabaseError> {
        let input: CreateBeneficiaryGroupInput = self
            .schema()
            .parse_validated("create_beneficiary_group", payload)?;
        self.create_beneficiary_group(company_id, &input).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the group does not exist.
    pub async fn get_beneficiary_group(&self, id: &str) -> Result<BeneficiaryGroup, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM beneficiary_groups WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let group = row_to_group(&row)?;
        self.check_tenant(&group.company_id)?;
        Ok(group)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_beneficiary_groups(
        &self,
        company_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<BeneficiaryGroup>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM beneficiary_groups
                     WHERE company_id = ?1 AND (?2 = 1 OR is_active = 1)
                     ORDER BY name"
                ),
                || libsql::params![company_id, i64::from(include_inactive)],
            )
            .await?;
        collect_rows(rows, row_to_group).await
    }

    /// Apply a partial update. Field rules are checked on the update itself;
    /// the age and size bounds are re-checked on the merged result.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Validation` with every failed rule.
    pub async fn update_beneficiary_group(
        &self,
        id: &str,
        update: &UpdateBeneficiaryGroupInput,
    ) -> Result<BeneficiaryGroup, DatabaseError> {
        let current = self.get_beneficiary_group(id).await?;
        if update.is_empty() {
            return Ok(current);
        }
        update.validate()?;

        let (age_min, age_max) = match update.age_range {
            Some(Some(range)) => (Some(range.min), Some(range.max)),
            Some(None) => (None, None),
            None => (current.age_range_min, current.age_range_max),
        };
        let min_size = update.min_group_size.unwrap_or(current.min_group_size);
        let max_size = update.max_group_size.unwrap_or(current.max_group_size);
        let bound_issues = group_bound_issues(age_min, age_max, min_size, max_size);
        if !bound_issues.is_empty() {
            return Err(DatabaseError::Validation(bound_issues));
        }

        let mut sets = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        let mut idx = 1;

        if let Some(ref name) = update.name {
            sets.push(format!("name = ?{idx}"));
            params.push(name.trim().into());
            idx += 1;
        }
        if let Some(ref description) = update.description {
            sets.push(format!("description = ?{idx}"));
            params.push(description.as_deref().into());
            idx += 1;
        }
        if let Some(ref region) = update.region {
            sets.push(format!("region = ?{idx}"));
            params.push(region.as_deref().into());
            idx += 1;
        }
        if update.age_range.is_some() {
            sets.push(format!("age_range_min = ?{idx}"));
            params.push(age_min.into());
            idx += 1;
            sets.push(format!("age_range_max = ?{idx}"));
            params.push(age_max.into());
            idx += 1;
        }
        if update.min_group_size.is_some() {
            sets.push(format!("min_group_size = ?{idx}"));
            params.push(min_size.into());
            idx += 1;
        }
        if update.max_group_size.is_some() {
            sets.push(format!("max_group_size = ?{idx}"));
            params.push(max_size.into());
            idx += 1;
        }
        if let Some(ref languages) = update.primary_languages {
            sets.push(format!("primary_languages = ?{idx}"));
            params.push(to_json_text(languages)?.into());
            idx += 1;
        }
        if let Some(ref tags) = update.tags {
            sets.push(format!("tags = ?{idx}"));
            params.push(to_json_text(tags)?.into());
            idx += 1;
        }
        if let Some(ref notes) = update.internal_notes {
            sets.push(format!("internal_notes = ?{idx}"));
            params.push(notes.as_deref().into());
            idx += 1;
        }

        sets.push(format!("updated_at = ?{idx}"));
        params.push(Utc::now().to_rfc3339().into());
        idx += 1;
        params.push(id.into());

        let sql = format!(
            "UPDATE beneficiary_groups SET {} WHERE id = ?{idx}",
            sets.join(", ")
        );
        self.db()
            .execute_with(&sql, || libsql::params_from_iter(params.clone()))
            .await?;

        let group = self.get_beneficiary_group(id).await?;

        self.record_audit(
            &group.company_id,
            AuditAction::Updated,
            ResourceType::BeneficiaryGroup,
            id,
            Some(serde_json::to_value(&current)?),
            Some(serde_json::to_value(update)?),
        )
        .await?;

        Ok(group)
    }

    /// Soft-delete: campaigns keep referencing the row.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the group does not exist.
    pub async fn deactivate_beneficiary_group(
        &self,
        id: &str,
    ) -> Result<BeneficiaryGroup, DatabaseError> {
        let current = self.get_beneficiary_group(id).await?;
        if !current.is_active {
            return Ok(current);
        }
        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE beneficiary_groups SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                || libsql::params![now.to_rfc3339(), id],
            )
            .await?;

        self.record_audit(
            &current.company_id,
            AuditAction::Updated,
            ResourceType::BeneficiaryGroup,
            id,
            None,
            Some(serde_json::json!({ "is_active": false })),
        )
        .await?;

        Ok(BeneficiaryGroup {
            is_active: false,
            updated_at: now,
            ..current
        })
    }
}
