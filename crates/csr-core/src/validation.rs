//! Input validation for API payloads.
//!
//! Structural limits (types, lengths, ranges) are expressed as `schemars`
//! attributes so the exported JSON Schema carries them. Cross-field rules and
//! content rules that JSON Schema cannot express live in [`Validate`] impls.
//! `csr-schema::SchemaRegistry::parse_validated` runs both layers.
//!
//! The Rust checks repeat the structural limits too, so callers that build
//! inputs in code get the same guarantees as callers that send JSON.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::BeneficiaryGroupType;
use crate::errors::CoreError;

pub const MAX_AGE: i64 = 120;
pub const NAME_MAX_LEN: usize = 200;
pub const DESCRIPTION_MAX_LEN: usize = 2000;
pub const INTERNAL_NOTES_MAX_LEN: usize = 5000;
pub const REGION_MAX_LEN: usize = 100;
pub const MAX_TAGS: usize = 20;
pub const TAG_MAX_LEN: usize = 50;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
        .expect("email pattern is a valid regex")
});

/// Whether `text` contains something shaped like an email address.
///
/// Free-text fields on beneficiary groups must not carry contact details of
/// individual beneficiaries.
#[must_use]
pub fn contains_email(text: &str) -> bool {
    EMAIL_PATTERN.is_match(text)
}

/// One failed rule, addressed by field path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Refinement rules beyond what the JSON Schema of a type can express.
pub trait Validate {
    /// Collect every failed rule. An empty vector means the value is valid.
    fn issues(&self) -> Vec<ValidationIssue>;

    /// # Errors
    ///
    /// Returns `CoreError::Validation` carrying every failed rule.
    fn validate(&self) -> Result<(), CoreError> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(issues))
        }
    }
}

// ---------------------------------------------------------------------------
// AgeRange
// ---------------------------------------------------------------------------

/// Inclusive age bounds. Valid when `0 <= min <= max <= 120`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AgeRange {
    #[schemars(range(min = 0, max = 120))]
    pub min: i64,
    #[schemars(range(min = 0, max = 120))]
    pub max: i64,
}

impl Validate for AgeRange {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if !(0..=MAX_AGE).contains(&self.min) {
            issues.push(ValidationIssue::new(
                "age_range.min",
                format!("must be between 0 and {MAX_AGE}"),
            ));
        }
        if !(0..=MAX_AGE).contains(&self.max) {
            issues.push(ValidationIssue::new(
                "age_range.max",
                format!("must be between 0 and {MAX_AGE}"),
            ));
        }
        if self.min > self.max {
            issues.push(ValidationIssue::new(
                "age_range",
                "min must be less than or equal to max",
            ));
        }
        issues
    }
}

/// Check the numeric bounds of a beneficiary group after any merge.
///
/// Used both for create inputs and for a stored group with an update applied.
#[must_use]
pub fn group_bound_issues(
    age_min: Option<i64>,
    age_max: Option<i64>,
    min_group_size: Option<i64>,
    max_group_size: Option<i64>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    match (age_min, age_max) {
        (Some(min), Some(max)) => issues.extend(AgeRange { min, max }.issues()),
        (None, None) => {}
        _ => issues.push(ValidationIssue::new(
            "age_range",
            "min and max must be provided together",
        )),
    }
    for (field, size) in [
        ("min_group_size", min_group_size),
        ("max_group_size", max_group_size),
    ] {
        if size.is_some_and(|s| s < 1) {
            issues.push(ValidationIssue::new(field, "must be at least 1"));
        }
    }
    if let (Some(min), Some(max)) = (min_group_size, max_group_size) {
        if min > max {
            issues.push(ValidationIssue::new(
                "min_group_size",
                "must be less than or equal to max_group_size",
            ));
        }
    }
    issues
}

fn text_issues(
    issues: &mut Vec<ValidationIssue>,
    field: &str,
    value: Option<&str>,
    max_len: usize,
    reject_email: bool,
) {
    let Some(value) = value else {
        return;
    };
    if value.chars().count() > max_len {
        issues.push(ValidationIssue::new(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    if reject_email && contains_email(value) {
        issues.push(ValidationIssue::new(
            field,
            "must not contain email addresses",
        ));
    }
}

fn name_issues(issues: &mut Vec<ValidationIssue>, name: &str) {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        issues.push(ValidationIssue::new("name", "must not be empty"));
    } else if trimmed.chars().count() > NAME_MAX_LEN {
        issues.push(ValidationIssue::new(
            "name",
            format!("must be at most {NAME_MAX_LEN} characters"),
        ));
    }
}

fn country_code_issues(issues: &mut Vec<ValidationIssue>, code: &str) {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        issues.push(ValidationIssue::new(
            "country_code",
            "must be an ISO 3166-1 alpha-2 code",
        ));
    }
}

fn list_issues(issues: &mut Vec<ValidationIssue>, languages: &[String], tags: &[String]) {
    for (i, lang) in languages.iter().enumerate() {
        if lang.len() != 2 || !lang.chars().all(|c| c.is_ascii_lowercase()) {
            issues.push(ValidationIssue::new(
                format!("primary_languages[{i}]"),
                "must be an ISO 639-1 code",
            ));
        }
    }
    if tags.len() > MAX_TAGS {
        issues.push(ValidationIssue::new(
            "tags",
            format!("must have at most {MAX_TAGS} entries"),
        ));
    }
    for (i, tag) in tags.iter().enumerate() {
        if tag.is_empty() || tag.chars().count() > TAG_MAX_LEN {
            issues.push(ValidationIssue::new(
                format!("tags[{i}]"),
                format!("must be 1 to {TAG_MAX_LEN} characters"),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// CreateBeneficiaryGroupInput
// ---------------------------------------------------------------------------

/// Payload for creating a beneficiary group.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CreateBeneficiaryGroupInput {
    #[schemars(length(min = 1, max = 200))]
    pub name: String,
    #[schemars(length(max = 2000))]
    pub description: Option<String>,
    pub group_type: BeneficiaryGroupType,
    #[schemars(length(min = 2, max = 2))]
    pub country_code: String,
    #[schemars(length(max = 100))]
    pub region: Option<String>,
    pub age_range: Option<AgeRange>,
    #[schemars(range(min = 1))]
    pub min_group_size: Option<i64>,
    #[schemars(range(min = 1))]
    pub max_group_size: Option<i64>,
    #[serde(default)]
    pub primary_languages: Vec<String>,
    #[serde(default)]
    #[schemars(length(max = 20))]
    pub tags: Vec<String>,
    #[schemars(length(max = 5000))]
    pub internal_notes: Option<String>,
}

impl Validate for CreateBeneficiaryGroupInput {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        name_issues(&mut issues, &self.name);
        text_issues(
            &mut issues,
            "description",
            self.description.as_deref(),
            DESCRIPTION_MAX_LEN,
            true,
        );
        country_code_issues(&mut issues, &self.country_code);
        text_issues(
            &mut issues,
            "region",
            self.region.as_deref(),
            REGION_MAX_LEN,
            false,
        );
        issues.extend(group_bound_issues(
            self.age_range.map(|r| r.min),
            self.age_range.map(|r| r.max),
            self.min_group_size,
            self.max_group_size,
        ));
        list_issues(&mut issues, &self.primary_languages, &self.tags);
        text_issues(
            &mut issues,
            "internal_notes",
            self.internal_notes.as_deref(),
            INTERNAL_NOTES_MAX_LEN,
            true,
        );
        issues
    }
}

// ---------------------------------------------------------------------------
// UpdateBeneficiaryGroupInput
// ---------------------------------------------------------------------------

/// Keeps an explicit JSON `null` apart from an absent field on
/// `Option<Option<T>>` update fields: absent is `None`, `null` is
/// `Some(None)`. Pair with `#[serde(default)]`.
pub mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(d: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(d).map(Some)
    }
}

/// Partial update of a beneficiary group. `Some(None)` clears a nullable field.
///
/// Only field-local rules are checked here; bounds that involve stored values
/// are re-checked with [`group_bound_issues`] after the update is merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct UpdateBeneficiaryGroupInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub region: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<AgeRange>")]
    pub age_range: Option<Option<AgeRange>>,
    #[serde(
        default,
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<i64>")]
    pub min_group_size: Option<Option<i64>>,
    #[serde(
        default,
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<i64>")]
    pub max_group_size: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub internal_notes: Option<Option<String>>,
}

impl UpdateBeneficiaryGroupInput {
    /// Whether the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.region.is_none()
            && self.age_range.is_none()
            && self.min_group_size.is_none()
            && self.max_group_size.is_none()
            && self.primary_languages.is_none()
            && self.tags.is_none()
            && self.internal_notes.is_none()
    }
}

impl Validate for UpdateBeneficiaryGroupInput {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if let Some(name) = &self.name {
            name_issues(&mut issues, name);
        }
        text_issues(
            &mut issues,
            "description",
            self.description.as_ref().and_then(Option::as_deref),
            DESCRIPTION_MAX_LEN,
            true,
        );
        text_issues(
            &mut issues,
            "region",
            self.region.as_ref().and_then(Option::as_deref),
            REGION_MAX_LEN,
            false,
        );
        if let Some(Some(range)) = &self.age_range {
            issues.extend(range.issues());
        }
        list_issues(
            &mut issues,
            self.primary_languages.as_deref().unwrap_or_default(),
            self.tags.as_deref().unwrap_or_default(),
        );
        text_issues(
            &mut issues,
            "internal_notes",
            self.internal_notes.as_ref().and_then(Option::as_deref),
            INTERNAL_NOTES_MAX_LEN,
            true,
        );
        issues
    }
}
