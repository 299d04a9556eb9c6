//! Review case model: the human-in-the-loop entity for a processed document.
//!
//! Cases are mutated only through `review::ReviewService::record_decision`,
//! which appends to the decision history and recomputes confidence and
//! validation. The history itself is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::DecisionSource;
use super::field::{FieldFlag, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    NeedsReview,
    Approved,
}

/// A validation issue surfaced to the reviewer in plain language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub flag: FieldFlag,
    /// Remediation context, e.g. "Total doesn't match Subtotal + Tax".
    pub message: String,
}

impl ValidationIssue {
    pub fn is_hard(&self) -> bool {
        self.flag.is_hard()
    }
}

/// Aggregated validation state for a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    pub hard_issues: Vec<ValidationIssue>,
    pub soft_issues: Vec<ValidationIssue>,
    pub can_approve: bool,
}

/// One recorded decision. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub field: String,
    pub original_value: Option<String>,
    pub chosen_value: String,
    pub source: DecisionSource,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

/// A document's extracted fields pending approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCase {
    pub id: String,
    /// Root input artifact id this case was built from.
    pub input_artifact_id: String,
    pub vendor_id: Option<String>,
    pub status: ReviewStatus,
    pub fields: Vec<FieldValue>,
    pub validation: ValidationResult,
    /// Weighted aggregate confidence, 0-100.
    pub overall_confidence: f64,
    pub decisions: Vec<ReviewDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewCase {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Whether a decision has been recorded for the given field.
    pub fn is_decided(&self, field: &str) -> bool {
        self.decisions.iter().any(|d| d.field == field)
    }

    /// The most recent decision for a field, if any.
    pub fn latest_decision(&self, field: &str) -> Option<&ReviewDecision> {
        self.decisions.iter().rev().find(|d| d.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_case() -> ReviewCase {
        ReviewCase {
            id: "case-1".to_string(),
            input_artifact_id: "input-1".to_string(),
            vendor_id: None,
            status: ReviewStatus::NeedsReview,
            fields: Vec::new(),
            validation: ValidationResult::default(),
            overall_confidence: 0.0,
            decisions: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_latest_decision_wins() {
        let mut case = empty_case();
        for value in ["100.00", "110.00"] {
            case.decisions.push(ReviewDecision {
                field: "total".to_string(),
                original_value: Some("99.00".to_string()),
                chosen_value: value.to_string(),
                source: DecisionSource::User,
                decided_by: "reviewer".to_string(),
                decided_at: Utc::now(),
            });
        }
        assert!(case.is_decided("total"));
        assert_eq!(
            case.latest_decision("total").unwrap().chosen_value,
            "110.00"
        );
        assert!(!case.is_decided("subtotal"));
    }
}
