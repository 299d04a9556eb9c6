//! Field resolution: consensus scoring, cross-field validation, and
//! plain-language explanations.
//!
//! Consensus is applied to raw candidate scores first; cross-field
//! penalties adjust the final confidence last.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};

use crate::config::ResolverConfig;
use crate::models::{AlternativeValue, Evidence, EvidenceKind, FieldFlag, FieldValue};
use crate::resolve::candidates::FieldCandidate;

/// Fields a usable invoice must carry. Missing ones get a hard flag.
const REQUIRED_FIELDS: [&str; 3] = ["invoice_number", "invoice_date", "total"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionSeverity {
    /// Blocks approval until a human resolves it.
    Critical,
    /// Reduces confidence only.
    Warning,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Contradiction {
    pub severity: ContradictionSeverity,
    pub fields: Vec<String>,
    pub message: String,
}

/// Output of resolution for one document.
#[derive(Debug, Clone)]
pub struct ResolvedFields {
    pub fields: Vec<FieldValue>,
    pub contradictions: Vec<Contradiction>,
    /// Minimum of per-field confidences after penalties.
    pub overall_confidence: f64,
}

impl ResolvedFields {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.field == name)
    }
}

pub struct FieldResolver {
    config: ResolverConfig,
}

impl FieldResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolve final field values from candidates.
    pub fn resolve(&self, candidates: &[FieldCandidate]) -> ResolvedFields {
        let mut by_field: HashMap<&str, Vec<FieldCandidate>> = HashMap::new();
        for c in candidates {
            by_field.entry(c.field.as_str()).or_default().push(c.clone());
        }

        let mut fields = Vec::new();
        for (field, mut group) in by_field {
            self.apply_consensus(&mut group);
            group.sort_by(|a, b| b.score.total_cmp(&a.score));
            let winner = &group[0];

            let alternatives = group[1..]
                .iter()
                .map(|c| AlternativeValue {
                    raw_value: c.raw_value.clone(),
                    normalized_value: c.normalized_value.clone(),
                    score: c.score,
                })
                .collect();

            fields.push(FieldValue {
                field: field.to_string(),
                value: winner.raw_value.clone(),
                normalized_value: winner.normalized_value.clone(),
                confidence: winner.score,
                source_artifact_ids: winner.source_artifact_ids.clone(),
                alternatives,
                evidence: winner.evidence.clone(),
                flags: Vec::new(),
                explanation: String::new(),
            });
        }

        for required in REQUIRED_FIELDS {
            if !fields.iter().any(|f| f.field == required) {
                fields.push(FieldValue {
                    field: required.to_string(),
                    value: String::new(),
                    normalized_value: String::new(),
                    confidence: 0.0,
                    source_artifact_ids: Vec::new(),
                    alternatives: Vec::new(),
                    evidence: Vec::new(),
                    flags: vec![FieldFlag::MissingValue],
                    explanation: format!("No candidate found for {}.", required),
                });
            }
        }
        fields.sort_by(|a, b| a.field.cmp(&b.field));

        let contradictions = self.validate(&mut fields);
        for field in &mut fields {
            if field.confidence < self.config.low_confidence_threshold
                && !field.has_flag(FieldFlag::MissingValue)
            {
                field.flags.push(FieldFlag::LowConfidence);
            }
            field.explanation = self.explain(field);
        }

        let overall_confidence = fields
            .iter()
            .map(|f| f.confidence)
            .fold(f64::INFINITY, f64::min);
        let overall_confidence = if overall_confidence.is_finite() {
            overall_confidence
        } else {
            0.0
        };

        ResolvedFields {
            fields,
            contradictions,
            overall_confidence,
        }
    }

    /// Boost candidates whose normalized value recurs across independent
    /// sources.
    fn apply_consensus(&self, group: &mut [FieldCandidate]) {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for c in group.iter() {
            *counts.entry(c.normalized_value.as_str()).or_insert(0) += 1;
        }
        let counts: HashMap<String, usize> = counts
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for c in group.iter_mut() {
            let n = counts.get(&c.normalized_value).copied().unwrap_or(1);
            if n > 1 {
                let boost = ((n as f64 - 1.0) * self.config.consensus_per_occurrence)
                    .min(self.config.consensus_cap);
                c.score = (c.score + boost).min(100.0);
                c.evidence.push(Evidence {
                    kind: EvidenceKind::Consensus,
                    detail: format!("Consensus (seen {} times)", n),
                });
            }
        }
    }

    /// Cross-field checks. Penalties subtract from confidence, bounded at
    /// zero; flags accumulate on the affected fields.
    fn validate(&self, fields: &mut [FieldValue]) -> Vec<Contradiction> {
        let mut contradictions = Vec::new();
        let amount = |fields: &[FieldValue], name: &str| -> Option<f64> {
            fields
                .iter()
                .find(|f| f.field == name && !f.normalized_value.is_empty())
                .and_then(|f| f.normalized_value.parse::<f64>().ok())
        };

        // Total = Subtotal + Tax within tolerance.
        if let (Some(sub), Some(tax), Some(total)) = (
            amount(fields, "subtotal"),
            amount(fields, "tax"),
            amount(fields, "total"),
        ) {
            if (sub + tax - total).abs() > self.config.amount_tolerance {
                for name in ["subtotal", "tax", "total"] {
                    if let Some(f) = fields.iter_mut().find(|f| f.field == name) {
                        f.confidence =
                            (f.confidence - self.config.penalties.total_mismatch).max(0.0);
                        f.flags.push(FieldFlag::CrossValidationFailed);
                    }
                }
                contradictions.push(Contradiction {
                    severity: ContradictionSeverity::Critical,
                    fields: vec![
                        "subtotal".to_string(),
                        "tax".to_string(),
                        "total".to_string(),
                    ],
                    message: format!(
                        "Total {:.2} doesn't match Subtotal {:.2} + Tax {:.2}",
                        total, sub, tax
                    ),
                });
            }
        }

        // Amount sanity on every monetary field.
        for name in ["subtotal", "tax", "total"] {
            let Some(value) = amount(fields, name) else { continue };
            let Some(f) = fields.iter_mut().find(|f| f.field == name) else {
                continue;
            };
            if value <= 0.0 && name != "tax" {
                f.flags.push(FieldFlag::InvalidAmount);
            }
            if value > self.config.large_amount_threshold {
                f.flags.push(FieldFlag::UnusuallyLargeAmount);
            }
        }

        // Invoice date must not be in the future.
        if let Some(f) = fields
            .iter_mut()
            .find(|f| f.field == "invoice_date" && !f.normalized_value.is_empty())
        {
            if let Ok(date) = NaiveDate::parse_from_str(&f.normalized_value, "%Y-%m-%d") {
                if date > Utc::now().date_naive() {
                    f.confidence = (f.confidence - self.config.penalties.future_date).max(0.0);
                    f.flags.push(FieldFlag::FutureDate);
                    contradictions.push(Contradiction {
                        severity: ContradictionSeverity::Warning,
                        fields: vec!["invoice_date".to_string()],
                        message: format!("Invoice date {} is in the future", f.normalized_value),
                    });
                }
            }
        }

        // Invoice number shape: alphanumeric-ish, 3-50 chars.
        if let Some(f) = fields
            .iter_mut()
            .find(|f| f.field == "invoice_number" && !f.normalized_value.is_empty())
        {
            let v = &f.normalized_value;
            let shape_ok = (3..=50).contains(&v.len())
                && v.chars().all(|c| c.is_alphanumeric() || "-_/#".contains(c));
            if !shape_ok {
                f.confidence =
                    (f.confidence - self.config.penalties.invoice_number_format).max(0.0);
                f.flags.push(FieldFlag::InvalidFormat);
                contradictions.push(Contradiction {
                    severity: ContradictionSeverity::Warning,
                    fields: vec!["invoice_number".to_string()],
                    message: "Invoice number has an unusual format".to_string(),
                });
            }
        }

        // Vendor name, when present, must look like a name.
        if let Some(f) = fields.iter_mut().find(|f| f.field == "vendor_name") {
            if f.normalized_value.trim().len() < 2 {
                f.confidence = (f.confidence - self.config.penalties.vendor_name).max(0.0);
                f.flags.push(FieldFlag::InvalidFormat);
            }
        }

        contradictions
    }

    /// Plain-language summary for the review UI.
    fn explain(&self, field: &FieldValue) -> String {
        if field.has_flag(FieldFlag::MissingValue) {
            return format!("No candidate found for {}.", field.field);
        }
        let tier = if field.confidence >= 85.0 {
            "High"
        } else if field.confidence >= self.config.low_confidence_threshold {
            "Medium"
        } else {
            "Low"
        };
        let mut parts = vec![format!(
            "{} confidence ({:.0}/100)",
            tier, field.confidence
        )];

        let kinds: Vec<&str> = field
            .evidence
            .iter()
            .map(|e| match e.kind {
                EvidenceKind::LabelMatch => "label match",
                EvidenceKind::LabelProximity => "label proximity",
                EvidenceKind::PatternMatch => "pattern match",
                EvidenceKind::PositionPrior => "position prior",
                EvidenceKind::Consensus => "consensus",
            })
            .collect();
        if !kinds.is_empty() {
            parts.push(format!("based on {}", kinds.join(", ")));
        }
        if let Some(consensus) = field
            .evidence
            .iter()
            .find(|e| e.kind == EvidenceKind::Consensus)
        {
            parts.push(consensus.detail.clone());
        }
        if field.has_flag(FieldFlag::CrossValidationFailed) {
            parts.push("Total doesn't match Subtotal + Tax".to_string());
        }
        if field.has_flag(FieldFlag::FutureDate) {
            parts.push("date is in the future".to_string());
        }
        parts.join("; ") + "."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(field: &str, normalized: &str, score: f64, source: &str) -> FieldCandidate {
        FieldCandidate {
            field: field.to_string(),
            raw_value: normalized.to_string(),
            normalized_value: normalized.to_string(),
            score,
            evidence: vec![Evidence {
                kind: EvidenceKind::LabelMatch,
                detail: "label".to_string(),
            }],
            source_artifact_ids: vec![source.to_string()],
        }
    }

    fn resolver() -> FieldResolver {
        FieldResolver::new(ResolverConfig::default())
    }

    fn base_candidates() -> Vec<FieldCandidate> {
        vec![
            candidate("invoice_number", "INV-1001", 90.0, "a"),
            candidate("invoice_date", "2026-01-15", 90.0, "a"),
            candidate("subtotal", "100.00", 90.0, "a"),
            candidate("tax", "10.00", 90.0, "a"),
            candidate("total", "110.00", 90.0, "a"),
        ]
    }

    #[test]
    fn test_consensus_beats_single_occurrence() {
        let mut candidates = base_candidates();
        candidates.push(candidate("total", "110.00", 90.0, "b"));
        candidates.push(candidate("total", "110.00", 90.0, "c"));
        candidates.push(candidate("total", "999.99", 92.0, "d"));

        let resolved = resolver().resolve(&candidates);
        let total = resolved.field("total").unwrap();
        // 3 agreeing occurrences get min(2*10, 20) = 20 points; the lone
        // 92-point outlier loses.
        assert_eq!(total.normalized_value, "110.00");
        assert!(total
            .evidence
            .iter()
            .any(|e| e.kind == EvidenceKind::Consensus && e.detail.contains("3 times")));
        assert!(!total.alternatives.is_empty());
    }

    #[test]
    fn test_cross_validation_passes_within_tolerance() {
        let resolved = resolver().resolve(&base_candidates());
        assert!(resolved.contradictions.is_empty());
        assert!(!resolved.field("total").unwrap().has_hard_flag());
    }

    #[test]
    fn test_cross_validation_failure_applies_exact_penalty() {
        let mut candidates = base_candidates();
        candidates.retain(|c| c.field != "total");
        candidates.push(candidate("total", "115.00", 90.0, "a"));

        let resolved = resolver().resolve(&candidates);
        let total = resolved.field("total").unwrap();
        assert!(total.has_flag(FieldFlag::CrossValidationFailed));
        assert_eq!(total.confidence, 70.0);
        assert!(resolved
            .contradictions
            .iter()
            .any(|c| c.severity == ContradictionSeverity::Critical));
    }

    #[test]
    fn test_future_date_penalty_and_flag() {
        let mut candidates = base_candidates();
        candidates.retain(|c| c.field != "invoice_date");
        candidates.push(candidate("invoice_date", "2199-01-01", 90.0, "a"));

        let resolved = resolver().resolve(&candidates);
        let date = resolved.field("invoice_date").unwrap();
        assert!(date.has_flag(FieldFlag::FutureDate));
        assert_eq!(date.confidence, 60.0);
        assert!(date.has_flag(FieldFlag::LowConfidence));
    }

    #[test]
    fn test_missing_required_field_is_hard_flagged() {
        let mut candidates = base_candidates();
        candidates.retain(|c| c.field != "invoice_number");

        let resolved = resolver().resolve(&candidates);
        let number = resolved.field("invoice_number").unwrap();
        assert!(number.has_flag(FieldFlag::MissingValue));
        assert!(number.has_hard_flag());
        assert_eq!(resolved.overall_confidence, 0.0);
    }

    #[test]
    fn test_negative_total_is_invalid_amount() {
        let mut candidates = base_candidates();
        candidates.retain(|c| c.field != "total" && c.field != "subtotal" && c.field != "tax");
        candidates.push(candidate("total", "0.00", 90.0, "a"));

        let resolved = resolver().resolve(&candidates);
        assert!(resolved
            .field("total")
            .unwrap()
            .has_flag(FieldFlag::InvalidAmount));
    }

    #[test]
    fn test_unusually_large_amount_is_soft() {
        let mut candidates = base_candidates();
        candidates.retain(|c| c.field != "total" && c.field != "subtotal" && c.field != "tax");
        candidates.push(candidate("total", "2000000.00", 90.0, "a"));

        let resolved = resolver().resolve(&candidates);
        let total = resolved.field("total").unwrap();
        assert!(total.has_flag(FieldFlag::UnusuallyLargeAmount));
        assert!(!FieldFlag::UnusuallyLargeAmount.is_hard());
    }

    #[test]
    fn test_overall_confidence_is_minimum() {
        let mut candidates = base_candidates();
        candidates.retain(|c| c.field != "tax");
        candidates.push(candidate("tax", "10.00", 75.0, "a"));

        let resolved = resolver().resolve(&candidates);
        assert_eq!(resolved.overall_confidence, 75.0);
    }

    #[test]
    fn test_explanation_names_tier_and_evidence() {
        let resolved = resolver().resolve(&base_candidates());
        let total = resolved.field("total").unwrap();
        assert!(total.explanation.starts_with("High confidence"));
        assert!(total.explanation.contains("label match"));
    }
}
