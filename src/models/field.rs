//! Resolved field values and calibration data points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::Evidence;

/// Flags attached to a resolved field when validation finds problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFlag {
    LowConfidence,
    FutureDate,
    InvalidAmount,
    UnusuallyLargeAmount,
    CrossValidationFailed,
    InvalidFormat,
    MissingValue,
}

impl FieldFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::FutureDate => "future_date",
            Self::InvalidAmount => "invalid_amount",
            Self::UnusuallyLargeAmount => "unusually_large_amount",
            Self::CrossValidationFailed => "cross_validation_failed",
            Self::InvalidFormat => "invalid_format",
            Self::MissingValue => "missing_value",
        }
    }

    /// Hard flags block approval; soft flags only reduce confidence.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::CrossValidationFailed | Self::InvalidAmount | Self::MissingValue
        )
    }
}

/// An alternative candidate retained alongside the resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeValue {
    pub raw_value: String,
    pub normalized_value: String,
    pub score: f64,
}

/// The resolved output for one field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field: String,
    pub value: String,
    pub normalized_value: String,
    /// 0-100 after all penalties.
    pub confidence: f64,
    /// Artifact ids of the candidates that won.
    pub source_artifact_ids: Vec<String>,
    pub alternatives: Vec<AlternativeValue>,
    pub evidence: Vec<Evidence>,
    pub flags: Vec<FieldFlag>,
    /// Plain-language summary for the review UI.
    pub explanation: String,
}

impl FieldValue {
    pub fn has_flag(&self, flag: FieldFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn has_hard_flag(&self) -> bool {
        self.flags.iter().any(|f| f.is_hard())
    }
}

/// One observation of how a predicted confidence turned out.
///
/// Appended after review: `actual_correct` is whether the resolved value
/// survived human review unchanged. Never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDataPoint {
    /// Predicted confidence at resolution time, 0-100.
    pub predicted_confidence: f64,
    pub actual_correct: bool,
    pub field: String,
    pub vendor_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CalibrationDataPoint {
    pub fn new(
        predicted_confidence: f64,
        actual_correct: bool,
        field: &str,
        vendor_id: Option<&str>,
    ) -> Self {
        Self {
            predicted_confidence,
            actual_correct,
            field: field.to_string(),
            vendor_id: vendor_id.map(|v| v.to_string()),
            recorded_at: Utc::now(),
        }
    }

    /// Decile bucket index 0-9 for this point's predicted confidence.
    pub fn bucket(&self) -> usize {
        ((self.predicted_confidence / 10.0).floor() as usize).min(9)
    }
}
