//! Program instance outcome update.
//!
//! Scores are produced by the external metrics pipeline and only stored here.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InstanceOutcomes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled_volunteers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled_beneficiaries: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sroi_score: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vis_score: Option<Option<f64>>,
}

impl InstanceOutcomes {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.enrolled_volunteers.is_none()
            && self.enrolled_beneficiaries.is_none()
            && self.total_hours.is_none()
            && self.sroi_score.is_none()
            && self.vis_score.is_none()
    }
}

pub struct InstanceOutcomesBuilder(InstanceOutcomes);

impl InstanceOutcomesBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self(InstanceOutcomes::default())
    }

    #[must_use]
    pub const fn enrolled_volunteers(mut self, count: i64) -> Self {
        self.0.enrolled_volunteers = Some(count);
        self
    }

    #[must_use]
    pub const fn enrolled_beneficiaries(mut self, count: i64) -> Self {
        self.0.enrolled_beneficiaries = Some(count);
        self
    }

    #[must_use]
    pub const fn total_hours(mut self, hours: f64) -> Self {
        self.0.total_hours = Some(hours);
        self
    }

    #[must_use]
    pub const fn sroi_score(mut self, score: Option<f64>) -> Self {
        self.0.sroi_score = Some(score);
        self
    }

    #[must_use]
    pub const fn vis_score(mut self, score: Option<f64>) -> Self {
        self.0.vis_score = Some(score);
        self
    }

    #[must_use]
    pub fn build(self) -> InstanceOutcomes {
        self.0
    }
}

impl Default for InstanceOutcomesBuilder {
    fn default() -> Self {
        Self::new()
    }
}
