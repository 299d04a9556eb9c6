//! Pipeline configuration.
//!
//! Everything tunable lives here: preprocessing weights, OCR profiles,
//! validation penalties, review thresholds, vendor lexicons. Loaded from a
//! TOML file at startup and passed into each service constructor as an
//! owned snapshot, so tests can supply deterministic fixtures and services
//! never read process-global state.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Ingest limits and rasterization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Reject files larger than this.
    pub max_file_size_bytes: u64,
    /// Rasterization DPI for PDF pages.
    pub dpi: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024,
            dpi: 300,
        }
    }
}

/// Orientation service tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationConfig {
    /// Deskew is applied only when |angle| is at or below this, degrees.
    pub max_skew_angle_degrees: f64,
    /// Hough vote threshold for line detection.
    pub line_vote_threshold: u32,
    /// Weight of horizontal-line signal in the readability score.
    pub line_weight: f64,
    /// Weight of text density.
    pub text_density_weight: f64,
    /// Weight of edge density.
    pub edge_density_weight: f64,
    /// Per-page wall-clock budget.
    pub time_budget_ms: u64,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            max_skew_angle_degrees: 10.0,
            line_vote_threshold: 120,
            line_weight: 0.5,
            text_density_weight: 0.3,
            edge_density_weight: 0.2,
            time_budget_ms: 5_000,
        }
    }
}

/// Cleanup shield detection and merge thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Overlap with a critical zone above this ratio produces a warning.
    pub warn_overlap_ratio: f64,
    /// Overlap above this forces Suggested mode and High risk.
    pub block_overlap_ratio: f64,
    /// Corner search region for logos, fraction of page width.
    pub logo_corner_width: f64,
    /// Corner search region for logos, fraction of page height.
    pub logo_corner_height: f64,
    /// Confidence boost for patterns repeating across pages.
    pub cross_page_boost: f64,
    /// Shields detected below this confidence are dropped.
    pub min_confidence: f64,
    /// Two shields closer than this overlap ratio are treated as the same
    /// region during precedence resolution.
    pub conflict_overlap_ratio: f64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            warn_overlap_ratio: 0.05,
            block_overlap_ratio: 0.10,
            logo_corner_width: 0.20,
            logo_corner_height: 0.15,
            cross_page_boost: 0.15,
            min_confidence: 0.30,
            conflict_overlap_ratio: 0.50,
        }
    }
}

/// Readiness score weights for variant generation. Normalized before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessWeights {
    pub contrast: f64,
    pub edge_density: f64,
    pub noise: f64,
    pub sharpness: f64,
}

impl Default for ReadinessWeights {
    fn default() -> Self {
        Self {
            contrast: 0.30,
            edge_density: 0.30,
            noise: 0.20,
            sharpness: 0.10,
        }
    }
}

impl ReadinessWeights {
    pub fn total(&self) -> f64 {
        self.contrast + self.edge_density + self.noise + self.sharpness
    }
}

/// Variant generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantConfig {
    /// Keep at most this many variants, ranked by readiness.
    pub keep_top_k: usize,
    /// Variants scoring below this are discarded.
    pub min_readiness: f64,
    pub weights: ReadinessWeights,
    /// Upscale factor for the upscale variant.
    pub upscale_factor: f64,
    /// Per-page wall-clock budget for generation plus scoring.
    pub time_budget_ms: u64,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            keep_top_k: 8,
            min_readiness: 0.30,
            weights: ReadinessWeights::default(),
            upscale_factor: 2.0,
            time_budget_ms: 10_000,
        }
    }
}

/// Zone detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Zones detected below this confidence are dropped.
    pub min_confidence: f64,
    /// Per-page wall-clock budget.
    pub time_budget_ms: u64,
    /// Crop padding applied around each zone, pixels.
    pub crop_padding_px: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            time_budget_ms: 3_000,
            crop_padding_px: 12,
        }
    }
}

/// A named Tesseract invocation preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrProfile {
    /// Page segmentation mode (tesseract --psm).
    pub psm: u32,
    /// OCR engine mode (tesseract --oem).
    pub oem: u32,
    pub dpi: u32,
    pub language: String,
    /// tessedit_char_whitelist, empty for none.
    #[serde(default)]
    pub whitelist: String,
    /// tessedit_char_blacklist, empty for none.
    #[serde(default)]
    pub blacklist: String,
    /// Per-call timeout for one engine invocation.
    pub timeout_ms: u64,
}

/// OCR orchestration budgets and profile routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Hard cap on attempts per document.
    pub max_attempts: usize,
    /// Wall-clock budget for the whole grid.
    pub wall_clock_budget_ms: u64,
    /// Bounded concurrency for engine subprocess calls.
    pub max_concurrency: usize,
    /// A zone is satisfied once its best result reaches this confidence.
    pub early_stop_confidence: f32,
    /// Named profiles, loadable without a rebuild.
    pub profiles: HashMap<String, OcrProfile>,
    /// Profile names to try per zone type, in order.
    pub zone_profiles: HashMap<String, Vec<String>>,
}

fn default_profiles() -> HashMap<String, OcrProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "full-page".to_string(),
        OcrProfile {
            psm: 3,
            oem: 1,
            dpi: 300,
            language: "eng".to_string(),
            whitelist: String::new(),
            blacklist: String::new(),
            timeout_ms: 15_000,
        },
    );
    profiles.insert(
        "numbers-only".to_string(),
        OcrProfile {
            psm: 6,
            oem: 1,
            dpi: 300,
            language: "eng".to_string(),
            whitelist: "0123456789.,$-".to_string(),
            blacklist: String::new(),
            timeout_ms: 10_000,
        },
    );
    profiles.insert(
        "table-dense".to_string(),
        OcrProfile {
            psm: 6,
            oem: 1,
            dpi: 300,
            language: "eng".to_string(),
            whitelist: String::new(),
            blacklist: String::new(),
            timeout_ms: 20_000,
        },
    );
    profiles.insert(
        "header-fields".to_string(),
        OcrProfile {
            psm: 4,
            oem: 1,
            dpi: 300,
            language: "eng".to_string(),
            whitelist: String::new(),
            blacklist: String::new(),
            timeout_ms: 10_000,
        },
    );
    profiles.insert(
        "single-word".to_string(),
        OcrProfile {
            psm: 8,
            oem: 1,
            dpi: 300,
            language: "eng".to_string(),
            whitelist: String::new(),
            blacklist: String::new(),
            timeout_ms: 5_000,
        },
    );
    profiles
}

fn default_zone_profiles() -> HashMap<String, Vec<String>> {
    let mut zp = HashMap::new();
    zp.insert(
        "header_fields".to_string(),
        vec!["header-fields".to_string(), "full-page".to_string()],
    );
    zp.insert(
        "totals_box".to_string(),
        vec!["numbers-only".to_string(), "full-page".to_string()],
    );
    zp.insert(
        "line_items_table".to_string(),
        vec!["table-dense".to_string(), "full-page".to_string()],
    );
    zp.insert("footer_notes".to_string(), vec!["full-page".to_string()]);
    zp.insert("barcode_area".to_string(), vec!["single-word".to_string()]);
    zp.insert("logo_area".to_string(), vec!["single-word".to_string()]);
    zp
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            wall_clock_budget_ms: 120_000,
            max_concurrency: 4,
            early_stop_confidence: 88.0,
            profiles: default_profiles(),
            zone_profiles: default_zone_profiles(),
        }
    }
}

impl OcrConfig {
    /// Profile names applicable to a zone type, falling back to full-page.
    pub fn profiles_for_zone(&self, zone_type: &str) -> Vec<String> {
        self.zone_profiles
            .get(zone_type)
            .cloned()
            .unwrap_or_else(|| vec!["full-page".to_string()])
    }
}

/// Per-field lexicon: label synonyms plus vendor-specific overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldLexicon {
    /// Global label synonyms, lowercase.
    pub labels: Vec<String>,
    /// Vendor id -> extra labels used by that vendor.
    #[serde(default)]
    pub vendor_labels: HashMap<String, Vec<String>>,
}

impl FieldLexicon {
    /// All labels applicable for a vendor, vendor overrides first.
    pub fn labels_for(&self, vendor_id: Option<&str>) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(vendor) = vendor_id {
            if let Some(extra) = self.vendor_labels.get(vendor) {
                out.extend(extra.iter().map(|s| s.as_str()));
            }
        }
        out.extend(self.labels.iter().map(|s| s.as_str()));
        out
    }
}

fn default_lexicon() -> HashMap<String, FieldLexicon> {
    let mut lex = HashMap::new();
    lex.insert(
        "invoice_number".to_string(),
        FieldLexicon {
            labels: vec![
                "invoice #".to_string(),
                "invoice no".to_string(),
                "invoice no.".to_string(),
                "invoice number".to_string(),
                "invoice".to_string(),
                "inv".to_string(),
            ],
            vendor_labels: HashMap::new(),
        },
    );
    lex.insert(
        "invoice_date".to_string(),
        FieldLexicon {
            labels: vec![
                "invoice date".to_string(),
                "date".to_string(),
                "issued".to_string(),
                "date of issue".to_string(),
            ],
            vendor_labels: HashMap::new(),
        },
    );
    lex.insert(
        "subtotal".to_string(),
        FieldLexicon {
            labels: vec![
                "subtotal".to_string(),
                "sub-total".to_string(),
                "sub total".to_string(),
                "net".to_string(),
            ],
            vendor_labels: HashMap::new(),
        },
    );
    lex.insert(
        "tax".to_string(),
        FieldLexicon {
            labels: vec![
                "tax".to_string(),
                "sales tax".to_string(),
                "vat".to_string(),
                "gst".to_string(),
            ],
            vendor_labels: HashMap::new(),
        },
    );
    lex.insert(
        "total".to_string(),
        FieldLexicon {
            labels: vec![
                "total".to_string(),
                "total due".to_string(),
                "amount due".to_string(),
                "balance due".to_string(),
                "grand total".to_string(),
            ],
            vendor_labels: HashMap::new(),
        },
    );
    lex.insert(
        "vendor_name".to_string(),
        FieldLexicon {
            labels: vec![
                "from".to_string(),
                "vendor".to_string(),
                "supplier".to_string(),
                "sold by".to_string(),
            ],
            vendor_labels: HashMap::new(),
        },
    );
    lex
}

/// Validation penalties, in confidence points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPenalties {
    pub total_mismatch: f64,
    pub future_date: f64,
    pub invoice_number_format: f64,
    pub vendor_name: f64,
}

impl Default for ValidationPenalties {
    fn default() -> Self {
        Self {
            total_mismatch: 20.0,
            future_date: 30.0,
            invoice_number_format: 15.0,
            vendor_name: 20.0,
        }
    }
}

/// Candidate scoring and cross-field validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Points added per extra occurrence of a normalized value.
    pub consensus_per_occurrence: f64,
    /// Cap on the total consensus boost.
    pub consensus_cap: f64,
    /// Tolerance for Total = Subtotal + Tax, in currency units.
    pub amount_tolerance: f64,
    /// Fields below this confidence get the low_confidence flag.
    pub low_confidence_threshold: f64,
    /// Amounts above this get the unusually_large_amount flag.
    pub large_amount_threshold: f64,
    pub penalties: ValidationPenalties,
    pub lexicon: HashMap<String, FieldLexicon>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            consensus_per_occurrence: 10.0,
            consensus_cap: 20.0,
            amount_tolerance: 0.02,
            low_confidence_threshold: 70.0,
            large_amount_threshold: 1_000_000.0,
            penalties: ValidationPenalties::default(),
            lexicon: default_lexicon(),
        }
    }
}

/// Confidence calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Minimum data points before a pool's calibration is trusted.
    pub min_samples: usize,
    /// Calibration error above this flags drift.
    pub drift_threshold: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            drift_threshold: 0.05,
        }
    }
}

/// Review policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Cases at or above this confidence with no hard flags can auto-approve.
    pub auto_approve_confidence: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            auto_approve_confidence: 85.0,
        }
    }
}

/// Artifact store retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Artifacts older than this are eligible for cleanup.
    pub ttl_hours: u64,
    /// LRU eviction kicks in above this total size. None disables it.
    pub max_bytes: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            max_bytes: None,
        }
    }
}

/// Complete pipeline configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingest: IngestConfig,
    pub orientation: OrientationConfig,
    pub shields: ShieldConfig,
    pub variants: VariantConfig,
    pub zones: ZoneConfig,
    pub ocr: OcrConfig,
    pub resolver: ResolverConfig,
    pub calibration: CalibrationConfig,
    pub review: ReviewConfig,
    pub store: StoreConfig,
}

impl PipelineConfig {
    /// Load a configuration snapshot from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&raw)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work before any processing starts.
    pub fn validate(&self) -> Result<()> {
        if self.variants.keep_top_k == 0 {
            return Err(PipelineError::InvalidConfig(
                "variants.keep_top_k must be at least 1".to_string(),
            ));
        }
        if self.variants.weights.total() <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "variants.weights must sum to a positive value".to_string(),
            ));
        }
        if self.ocr.max_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "ocr.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.ocr.profiles.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "ocr.profiles must define at least one profile".to_string(),
            ));
        }
        for (zone, names) in &self.ocr.zone_profiles {
            for name in names {
                if !self.ocr.profiles.contains_key(name) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "zone_profiles.{} references unknown profile '{}'",
                        zone, name
                    )));
                }
            }
        }
        if self.shields.block_overlap_ratio < self.shields.warn_overlap_ratio {
            return Err(PipelineError::InvalidConfig(
                "shields.block_overlap_ratio must be >= warn_overlap_ratio".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_profiles_present() {
        let config = PipelineConfig::default();
        for name in [
            "full-page",
            "numbers-only",
            "table-dense",
            "header-fields",
            "single-word",
        ] {
            assert!(config.ocr.profiles.contains_key(name), "missing {}", name);
        }
    }

    #[test]
    fn test_zone_profile_fallback() {
        let config = OcrConfig::default();
        assert_eq!(
            config.profiles_for_zone("unknown_zone"),
            vec!["full-page".to_string()]
        );
    }

    #[test]
    fn test_invalid_zone_profile_reference_rejected() {
        let mut config = PipelineConfig::default();
        config
            .ocr
            .zone_profiles
            .insert("totals_box".to_string(), vec!["missing".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[variants]\nkeep_top_k = 5\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.variants.keep_top_k, 5);
        assert_eq!(config.calibration.min_samples, 100);
    }

    #[test]
    fn test_vendor_labels_take_priority() {
        let mut lexicon = FieldLexicon {
            labels: vec!["invoice #".to_string()],
            vendor_labels: HashMap::new(),
        };
        lexicon
            .vendor_labels
            .insert("acme".to_string(), vec!["acme invoice".to_string()]);
        let labels = lexicon.labels_for(Some("acme"));
        assert_eq!(labels[0], "acme invoice");
        assert!(labels.contains(&"invoice #"));
    }
}
