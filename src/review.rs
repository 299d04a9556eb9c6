//! Review case workflow.
//!
//! A case starts in `NeedsReview` and moves to `Approved` only when no
//! hard validation issues remain. Decisions are appended, never edited;
//! each one recomputes the case's confidence and validation state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::config::ReviewConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    DecisionSource, FieldFlag, FieldValue, ReviewCase, ReviewDecision, ReviewStatus,
    ValidationIssue, ValidationResult,
};
use crate::resolve::ResolvedFields;

pub struct ReviewService {
    config: ReviewConfig,
    path: Option<PathBuf>,
    cases: Mutex<HashMap<String, ReviewCase>>,
}

impl ReviewService {
    pub fn new(config: ReviewConfig) -> Self {
        Self {
            config,
            path: None,
            cases: Mutex::new(HashMap::new()),
        }
    }

    /// File-backed service; loads any existing cases.
    pub fn open(path: PathBuf, config: ReviewConfig) -> Result<Self> {
        let cases = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            config,
            path: Some(path),
            cases: Mutex::new(cases),
        })
    }

    /// Build a case from resolved fields. Cases that clear validation and
    /// the auto-approve threshold start out approved.
    pub fn create_case(
        &self,
        input_artifact_id: &str,
        vendor_id: Option<&str>,
        resolved: &ResolvedFields,
    ) -> Result<ReviewCase> {
        let validation = validate_fields(&resolved.fields, &[]);
        let status = if validation.can_approve
            && resolved.overall_confidence >= self.config.auto_approve_confidence
        {
            ReviewStatus::Approved
        } else {
            ReviewStatus::NeedsReview
        };
        let now = Utc::now();
        let case = ReviewCase {
            id: Uuid::new_v4().to_string(),
            input_artifact_id: input_artifact_id.to_string(),
            vendor_id: vendor_id.map(|v| v.to_string()),
            status,
            fields: resolved.fields.clone(),
            validation,
            overall_confidence: resolved.overall_confidence,
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut cases = self.lock()?;
        cases.insert(case.id.clone(), case.clone());
        self.persist(&cases)?;
        tracing::info!(
            case_id = %case.id,
            status = ?case.status,
            confidence = case.overall_confidence,
            "review case created"
        );
        Ok(case)
    }

    pub fn get(&self, case_id: &str) -> Result<ReviewCase> {
        self.lock()?
            .get(case_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("review case {}", case_id)))
    }

    /// All cases, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<ReviewStatus>) -> Result<Vec<ReviewCase>> {
        let cases = self.lock()?;
        let mut out: Vec<ReviewCase> = cases
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Append a decision and recompute confidence and validation.
    ///
    /// Decided fields count as fully confident in the aggregate, and any
    /// flags on them are considered resolved by the human.
    pub fn record_decision(
        &self,
        case_id: &str,
        field: &str,
        chosen_value: &str,
        source: DecisionSource,
        decided_by: &str,
    ) -> Result<ReviewCase> {
        let mut cases = self.lock()?;
        let case = cases
            .get_mut(case_id)
            .ok_or_else(|| PipelineError::NotFound(format!("review case {}", case_id)))?;
        if !case.fields.iter().any(|f| f.field == field) {
            return Err(PipelineError::InvalidInput(format!(
                "case {} has no field {}",
                case_id, field
            )));
        }

        let original_value = case
            .field(field)
            .filter(|f| !f.value.is_empty())
            .map(|f| f.value.clone());
        case.decisions.push(ReviewDecision {
            field: field.to_string(),
            original_value,
            chosen_value: chosen_value.to_string(),
            source,
            decided_by: decided_by.to_string(),
            decided_at: Utc::now(),
        });

        let decided: Vec<String> = case.decisions.iter().map(|d| d.field.clone()).collect();
        case.validation = validate_fields(&case.fields, &decided);
        case.overall_confidence = aggregate_confidence(&case.fields, &decided);
        case.updated_at = Utc::now();

        let updated = case.clone();
        self.persist(&cases)?;
        Ok(updated)
    }

    /// Move a case to `Approved`. Refused while hard issues remain.
    pub fn approve(&self, case_id: &str, approved_by: &str) -> Result<ReviewCase> {
        let mut cases = self.lock()?;
        let case = cases
            .get_mut(case_id)
            .ok_or_else(|| PipelineError::NotFound(format!("review case {}", case_id)))?;
        if !case.validation.can_approve {
            return Err(PipelineError::InvalidInput(format!(
                "case {} has {} unresolved hard issue(s)",
                case_id,
                case.validation.hard_issues.len()
            )));
        }
        case.status = ReviewStatus::Approved;
        case.updated_at = Utc::now();
        tracing::info!(case_id = %case.id, approved_by, "review case approved");
        let updated = case.clone();
        self.persist(&cases)?;
        Ok(updated)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ReviewCase>>> {
        self.cases
            .lock()
            .map_err(|_| PipelineError::ProcessingFailed("review store poisoned".to_string()))
    }

    fn persist(&self, cases: &HashMap<String, ReviewCase>) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(cases)?)?;
        }
        Ok(())
    }
}

/// Collect hard and soft issues from field flags, skipping fields a human
/// has already decided.
fn validate_fields(fields: &[FieldValue], decided: &[String]) -> ValidationResult {
    let mut hard_issues = Vec::new();
    let mut soft_issues = Vec::new();
    for field in fields {
        if decided.iter().any(|d| d == &field.field) {
            continue;
        }
        for flag in &field.flags {
            let issue = ValidationIssue {
                field: field.field.clone(),
                flag: *flag,
                message: flag_message(*flag, field),
            };
            if flag.is_hard() {
                hard_issues.push(issue);
            } else {
                soft_issues.push(issue);
            }
        }
    }
    let can_approve = hard_issues.is_empty();
    ValidationResult {
        hard_issues,
        soft_issues,
        can_approve,
    }
}

fn flag_message(flag: FieldFlag, field: &FieldValue) -> String {
    match flag {
        FieldFlag::CrossValidationFailed => {
            "Total doesn't match Subtotal + Tax".to_string()
        }
        FieldFlag::MissingValue => format!("No value was found for {}", field.field),
        FieldFlag::InvalidAmount => {
            format!("{} must be a positive amount", field.field)
        }
        FieldFlag::FutureDate => format!("{} is in the future", field.field),
        FieldFlag::LowConfidence => {
            format!("{} was read with low confidence", field.field)
        }
        FieldFlag::UnusuallyLargeAmount => {
            format!("{} is unusually large", field.field)
        }
        FieldFlag::InvalidFormat => format!("{} has an unusual format", field.field),
    }
}

/// Mean confidence where decided fields count as fully confident.
fn aggregate_confidence(fields: &[FieldValue], decided: &[String]) -> f64 {
    if fields.is_empty() {
        return 0.0;
    }
    let sum: f64 = fields
        .iter()
        .map(|f| {
            if decided.iter().any(|d| d == &f.field) {
                100.0
            } else {
                f.confidence
            }
        })
        .sum();
    sum / fields.len() as f64
}
