//! Field candidate generation from zone OCR text.
//!
//! Scans OCR lines against a vendor-aware label lexicon and proposes
//! scored candidates with an evidence trail. Resolution and validation
//! happen downstream; this stage only proposes.

use chrono::NaiveDate;
use regex::Regex;

use crate::config::ResolverConfig;
use crate::models::{Evidence, EvidenceKind, ZoneType};

/// One OCR'd text source feeding candidate generation.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub zone_type: ZoneType,
    pub text: String,
    /// Mean OCR confidence for this source, 0-100.
    pub avg_confidence: f32,
    /// Artifact id of the OCR result this text came from.
    pub artifact_id: String,
}

/// A proposed value for one field, before resolution.
#[derive(Debug, Clone)]
pub struct FieldCandidate {
    pub field: String,
    pub raw_value: String,
    pub normalized_value: String,
    /// 0-100, OCR confidence plus evidence bonuses.
    pub score: f64,
    pub evidence: Vec<Evidence>,
    pub source_artifact_ids: Vec<String>,
}

/// How a field's value is shaped, which picks the extraction pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    Amount,
    Date,
    Identifier,
    Text,
}

fn field_class(field: &str) -> FieldClass {
    match field {
        "subtotal" | "tax" | "total" => FieldClass::Amount,
        f if f.contains("date") => FieldClass::Date,
        f if f.contains("number") => FieldClass::Identifier,
        _ => FieldClass::Text,
    }
}

/// Zone a field is expected to appear in, for the position-prior bonus.
fn expected_zone(field: &str) -> Option<ZoneType> {
    match field {
        "subtotal" | "tax" | "total" => Some(ZoneType::TotalsBox),
        "invoice_number" | "invoice_date" | "vendor_name" => Some(ZoneType::HeaderFields),
        _ => None,
    }
}

const LABEL_MATCH_BONUS: f64 = 8.0;
const PATTERN_MATCH_BONUS: f64 = 5.0;
const POSITION_PRIOR_BONUS: f64 = 4.0;
const LABEL_PROXIMITY_BONUS: f64 = 3.0;

pub struct CandidateGenerator {
    config: ResolverConfig,
    amount_re: Regex,
    date_res: Vec<(Regex, &'static str)>,
    identifier_re: Regex,
}

impl CandidateGenerator {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            amount_re: Regex::new(r"\$?\s*(\d{1,3}(?:,\d{3})*\.\d{2}|\d+\.\d{2})").unwrap(),
            date_res: vec![
                (Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap(), "%Y-%m-%d"),
                (Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{4})\b").unwrap(), "%m/%d/%Y"),
                (
                    Regex::new(r"\b([A-Z][a-z]+ \d{1,2}, \d{4})\b").unwrap(),
                    "%B %d, %Y",
                ),
            ],
            identifier_re: Regex::new(r"[A-Za-z0-9][A-Za-z0-9/_#-]{2,49}").unwrap(),
        }
    }

    /// Propose candidates for every configured field across all sources.
    pub fn generate(
        &self,
        sources: &[SourceText],
        vendor_id: Option<&str>,
    ) -> Vec<FieldCandidate> {
        let mut candidates = Vec::new();
        for source in sources {
            let lines: Vec<&str> = source.text.lines().collect();
            for (field, lexicon) in &self.config.lexicon {
                let labels = lexicon.labels_for(vendor_id);
                for (line_idx, line) in lines.iter().enumerate() {
                    let Some((label, after)) = best_label_match(line, &labels) else {
                        continue;
                    };
                    let mut evidence = vec![Evidence {
                        kind: EvidenceKind::LabelMatch,
                        detail: format!("label \"{}\" found in {}", label, source.zone_type.as_str()),
                    }];
                    let mut bonus = LABEL_MATCH_BONUS;

                    // Value on the same line, or first pattern hit on the
                    // next line when the label stands alone.
                    let mut extracted = self.extract_value(field, after);
                    if extracted.is_none() {
                        if let Some(next) = lines.get(line_idx + 1) {
                            extracted = self.extract_value(field, next);
                            if extracted.is_some() {
                                evidence.push(Evidence {
                                    kind: EvidenceKind::LabelProximity,
                                    detail: "value found on the line below its label".to_string(),
                                });
                                bonus += LABEL_PROXIMITY_BONUS;
                            }
                        }
                    }
                    let Some((raw, normalized, pattern_hit)) = extracted else {
                        continue;
                    };
                    if pattern_hit {
                        evidence.push(Evidence {
                            kind: EvidenceKind::PatternMatch,
                            detail: format!("value matches the {} shape", field),
                        });
                        bonus += PATTERN_MATCH_BONUS;
                    }
                    if expected_zone(field) == Some(source.zone_type) {
                        evidence.push(Evidence {
                            kind: EvidenceKind::PositionPrior,
                            detail: format!(
                                "{} usually appears in {}",
                                field,
                                source.zone_type.as_str()
                            ),
                        });
                        bonus += POSITION_PRIOR_BONUS;
                    }

                    candidates.push(FieldCandidate {
                        field: field.clone(),
                        raw_value: raw,
                        normalized_value: normalized,
                        score: (f64::from(source.avg_confidence) + bonus).clamp(0.0, 100.0),
                        evidence,
                        source_artifact_ids: vec![source.artifact_id.clone()],
                    });
                }
            }
        }
        candidates
    }

    /// Extract (raw, normalized, pattern_matched) for a field from text.
    fn extract_value(&self, field: &str, text: &str) -> Option<(String, String, bool)> {
        let text = text.trim_start_matches([':', ';', '-', '.', ' ', '\t']).trim();
        if text.is_empty() {
            return None;
        }
        match field_class(field) {
            FieldClass::Amount => {
                let m = self.amount_re.captures(text)?;
                let raw = m.get(0)?.as_str().trim().to_string();
                let normalized = m.get(1)?.as_str().replace(',', "");
                Some((raw, normalized, true))
            }
            FieldClass::Date => {
                for (re, fmt) in &self.date_res {
                    if let Some(m) = re.captures(text) {
                        let raw = m.get(1)?.as_str().to_string();
                        if let Ok(date) = NaiveDate::parse_from_str(&raw, fmt) {
                            return Some((raw, date.format("%Y-%m-%d").to_string(), true));
                        }
                    }
                }
                None
            }
            FieldClass::Identifier => {
                let m = self.identifier_re.find(text)?;
                let raw = m.as_str().to_string();
                let normalized = raw.to_uppercase();
                Some((raw, normalized, true))
            }
            FieldClass::Text => {
                let raw = text.to_string();
                let normalized = raw.to_lowercase();
                Some((raw, normalized, false))
            }
        }
    }
}

/// Find the longest label that matches `line` on word boundaries, and
/// return it with the text after the match.
fn best_label_match<'a>(line: &'a str, labels: &[&str]) -> Option<(String, &'a str)> {
    let lower = line.to_lowercase();
    let mut best: Option<(String, usize)> = None;
    for label in labels {
        let mut search_from = 0;
        while let Some(rel) = lower[search_from..].find(label) {
            let start = search_from + rel;
            let end = start + label.len();
            if line.is_char_boundary(end)
                && bounded(&lower, start, end)
                && best.as_ref().map_or(true, |(b, _)| label.len() > b.len())
            {
                best = Some((label.to_string(), end));
            }
            search_from = end;
        }
    }
    best.map(|(label, end)| (label, &line[end..]))
}

/// Whether [start, end) sits on word boundaries in `text`.
fn bounded(text: &str, start: usize, end: usize) -> bool {
    let before_ok = start == 0
        || text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
    let after_ok = end == text.len()
        || text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
    before_ok && after_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> CandidateGenerator {
        CandidateGenerator::new(ResolverConfig::default())
    }

    fn source(zone_type: ZoneType, text: &str) -> SourceText {
        SourceText {
            zone_type,
            text: text.to_string(),
            avg_confidence: 90.0,
            artifact_id: "ocr-1".to_string(),
        }
    }

    fn find<'a>(candidates: &'a [FieldCandidate], field: &str) -> &'a FieldCandidate {
        candidates
            .iter()
            .find(|c| c.field == field)
            .unwrap_or_else(|| panic!("no candidate for {}", field))
    }

    #[test]
    fn test_extracts_amounts_from_totals_text() {
        let sources = [source(
            ZoneType::TotalsBox,
            "Subtotal: $50.00\nTax: $5.00\nTotal Due: $55.00",
        )];
        let candidates = generator().generate(&sources, None);

        assert_eq!(find(&candidates, "subtotal").normalized_value, "50.00");
        assert_eq!(find(&candidates, "tax").normalized_value, "5.00");
        assert_eq!(find(&candidates, "total").normalized_value, "55.00");
    }

    #[test]
    fn test_subtotal_line_does_not_produce_total_candidate() {
        let sources = [source(ZoneType::TotalsBox, "Subtotal: $50.00")];
        let candidates = generator().generate(&sources, None);
        assert!(candidates.iter().all(|c| c.field != "total"));
    }

    #[test]
    fn test_thousands_separator_normalized_away() {
        let sources = [source(ZoneType::TotalsBox, "Total: $1,250.50")];
        let candidates = generator().generate(&sources, None);
        assert_eq!(find(&candidates, "total").normalized_value, "1250.50");
    }

    #[test]
    fn test_invoice_number_and_date_from_header() {
        let sources = [source(
            ZoneType::HeaderFields,
            "Invoice #: INV-1001\nDate: 08/12/2026",
        )];
        let candidates = generator().generate(&sources, None);

        assert_eq!(find(&candidates, "invoice_number").normalized_value, "INV-1001");
        assert_eq!(find(&candidates, "invoice_date").normalized_value, "2026-08-12");
    }

    #[test]
    fn test_value_on_next_line_gets_proximity_evidence() {
        let sources = [source(ZoneType::TotalsBox, "Total Due\n$55.00")];
        let candidates = generator().generate(&sources, None);
        let total = find(&candidates, "total");
        assert_eq!(total.normalized_value, "55.00");
        assert!(total
            .evidence
            .iter()
            .any(|e| e.kind == EvidenceKind::LabelProximity));
    }

    #[test]
    fn test_position_prior_raises_score() {
        let in_totals = [source(ZoneType::TotalsBox, "Total: $55.00")];
        let in_footer = [source(ZoneType::FooterNotes, "Total: $55.00")];
        let gen = generator();
        let a = gen.generate(&in_totals, None);
        let b = gen.generate(&in_footer, None);
        assert!(find(&a, "total").score > find(&b, "total").score);
    }

    #[test]
    fn test_vendor_labels_take_effect() {
        let mut config = ResolverConfig::default();
        config
            .lexicon
            .get_mut("invoice_number")
            .unwrap()
            .vendor_labels
            .insert("acme".to_string(), vec!["acme ref".to_string()]);
        let gen = CandidateGenerator::new(config);

        let sources = [source(ZoneType::HeaderFields, "ACME Ref: A-77-B")];
        let with_vendor = gen.generate(&sources, Some("acme"));
        let without = gen.generate(&sources, None);

        assert_eq!(find(&with_vendor, "invoice_number").normalized_value, "A-77-B");
        assert!(without.iter().all(|c| c.field != "invoice_number"));
    }
}
