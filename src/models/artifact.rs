//! Artifact model for the enhancement pipeline.
//!
//! Every stage output is an `Artifact`: an immutable, content-addressed
//! record linked to its parent, forming a tree rooted at an `Input`. The
//! tree makes every OCR word, candidate, and decision traceable back to the
//! original uploaded file.
//!
//! Identity is a SHA-256 hash over the canonical JSON of the artifact's
//! payload and parent id, so re-running a stage on identical input produces
//! the identical cache key. Timestamps are envelope metadata and do not
//! participate in the hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use super::bbox::{BoundingBox, NormalizedBox};

/// Semantic zone categories recognized on an invoice page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    HeaderFields,
    TotalsBox,
    LineItemsTable,
    FooterNotes,
    BarcodeArea,
    LogoArea,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeaderFields => "header_fields",
            Self::TotalsBox => "totals_box",
            Self::LineItemsTable => "line_items_table",
            Self::FooterNotes => "footer_notes",
            Self::BarcodeArea => "barcode_area",
            Self::LogoArea => "logo_area",
        }
    }

    /// Zones carrying business-critical values that cleanup shields must not
    /// silently cover.
    pub fn is_business_critical(&self) -> bool {
        matches!(self, Self::TotalsBox | Self::LineItemsTable)
    }
}

impl std::fmt::Display for ZoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Preprocessing recipe applied to produce an image variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Original,
    Grayscale,
    AdaptiveThreshold,
    DenoiseSharpen,
    ContrastBoost,
    Upscale,
    DeskewTouchup,
    GrayscaleContrast,
    GrayscaleThreshold,
    DenoiseContrast,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Grayscale => "grayscale",
            Self::AdaptiveThreshold => "adaptive_threshold",
            Self::DenoiseSharpen => "denoise_sharpen",
            Self::ContrastBoost => "contrast_boost",
            Self::Upscale => "upscale",
            Self::DeskewTouchup => "deskew_touchup",
            Self::GrayscaleContrast => "grayscale_contrast",
            Self::GrayscaleThreshold => "grayscale_threshold",
            Self::DenoiseContrast => "denoise_contrast",
        }
    }
}

/// How a zone's bounding box was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneProvenance {
    /// Produced by the heuristic detector.
    Detected,
    /// Explicitly overridden by an operator; confidence is always 1.0.
    Manual,
}

/// Bidirectional mapping between zone-local and original-page coordinates.
///
/// Crops change the origin and upscaled variants change the scale, so OCR
/// word boxes need this to land on the right spot of the original page for
/// UI highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateMapping {
    /// Crop origin on the variant image, in variant pixels.
    pub offset_x: u32,
    pub offset_y: u32,
    /// Scale from variant pixels to original page pixels.
    pub scale_x: f64,
    pub scale_y: f64,
}

impl CoordinateMapping {
    /// Map a zone-local box to original-page coordinates.
    pub fn to_page(&self, local: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x: (((local.x + self.offset_x) as f64) * self.scale_x).round() as u32,
            y: (((local.y + self.offset_y) as f64) * self.scale_y).round() as u32,
            width: (local.width as f64 * self.scale_x).round() as u32,
            height: (local.height as f64 * self.scale_y).round() as u32,
        }
    }

    /// Map an original-page box back to zone-local coordinates.
    ///
    /// Returns `None` when the page box lies outside the cropped region.
    pub fn to_zone(&self, page: &BoundingBox) -> Option<BoundingBox> {
        let vx = (page.x as f64 / self.scale_x).round() as u32;
        let vy = (page.y as f64 / self.scale_y).round() as u32;
        if vx < self.offset_x || vy < self.offset_y {
            return None;
        }
        Some(BoundingBox {
            x: vx - self.offset_x,
            y: vy - self.offset_y,
            width: (page.width as f64 / self.scale_x).round() as u32,
            height: (page.height as f64 / self.scale_y).round() as u32,
        })
    }
}

/// One recognized word from OCR, with position and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// 0-100 as reported by the engine.
    pub confidence: f32,
}

/// Kinds of supporting evidence attached to a field candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    LabelMatch,
    LabelProximity,
    PatternMatch,
    PositionPrior,
    Consensus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub detail: String,
}

/// Where a review decision originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    User,
    Template,
    Auto,
}

/// Payload of an artifact, one variant per pipeline stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The original uploaded file. Root of the provenance tree.
    Input {
        file_path: PathBuf,
        content_hash: String,
        mime_type: String,
        size_bytes: u64,
    },
    /// A rasterized page of the input document.
    Page {
        page_number: u32,
        image_path: PathBuf,
        width: u32,
        height: u32,
        dpi: u32,
        /// Rotation applied during orientation correction, degrees clockwise.
        rotation_applied: u32,
        /// Deskew angle applied after rotation, degrees.
        skew_applied: f64,
    },
    /// A preprocessed rendering of a page.
    Variant {
        variant_type: VariantType,
        image_path: PathBuf,
        width: u32,
        height: u32,
        readiness_score: f64,
    },
    /// A cropped semantic region of a variant.
    Zone {
        zone_type: ZoneType,
        image_path: PathBuf,
        bbox: BoundingBox,
        normalized_bbox: NormalizedBox,
        confidence: f64,
        provenance: ZoneProvenance,
        mapping: CoordinateMapping,
    },
    /// Text extraction result for a zone crop.
    Ocr {
        text: String,
        avg_confidence: f32,
        words: Vec<OcrWord>,
        profile: String,
        engine: String,
        processing_time_ms: u64,
    },
    /// A proposed value for a named field.
    Candidate {
        field: String,
        raw_value: String,
        normalized_value: String,
        score: f64,
        evidence: Vec<Evidence>,
        source_artifact_ids: Vec<String>,
    },
    /// A human or template review decision for a field.
    Decision {
        field: String,
        original_value: Option<String>,
        chosen_value: String,
        source: DecisionSource,
        decided_by: String,
    },
}

impl ArtifactKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Page { .. } => "page",
            Self::Variant { .. } => "variant",
            Self::Zone { .. } => "zone",
            Self::Ocr { .. } => "ocr",
            Self::Candidate { .. } => "candidate",
            Self::Decision { .. } => "decision",
        }
    }
}

/// An immutable pipeline record. Corrections create new artifacts; nothing
/// is ever mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Content hash of (parent_id, kind). Doubles as the store key.
    pub id: String,
    /// Parent artifact id. `None` only for `Input`.
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Create a root input artifact.
    pub fn new_input(kind: ArtifactKind) -> Self {
        debug_assert!(matches!(kind, ArtifactKind::Input { .. }));
        let id = Self::content_hash(None, &kind);
        Self {
            id,
            parent_id: None,
            created_at: Utc::now(),
            kind,
        }
    }

    /// Create a child artifact under `parent_id`.
    pub fn new_child(parent_id: &str, kind: ArtifactKind) -> Self {
        let id = Self::content_hash(Some(parent_id), &kind);
        Self {
            id,
            parent_id: Some(parent_id.to_string()),
            created_at: Utc::now(),
            kind,
        }
    }

    /// Deterministic identity hash over parent linkage and payload.
    ///
    /// serde_json serializes struct fields in declaration order, so the
    /// JSON form is canonical for our types.
    pub fn content_hash(parent_id: Option<&str>, kind: &ArtifactKind) -> String {
        let hashable = serde_json::to_vec(&(parent_id, kind))
            .expect("artifact kinds always serialize");
        let mut hasher = Sha256::new();
        hasher.update(&hashable);
        hex::encode(hasher.finalize())
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, ArtifactKind::Input { .. })
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> ArtifactKind {
        ArtifactKind::Input {
            file_path: PathBuf::from("/tmp/invoice.png"),
            content_hash: "abc123".to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn test_identical_content_hashes_identically() {
        let a = Artifact::new_input(sample_input());
        let b = Artifact::new_input(sample_input());
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_parent_changes_hash() {
        let kind = ArtifactKind::Ocr {
            text: "TOTAL 55.00".to_string(),
            avg_confidence: 91.0,
            words: vec![],
            profile: "full-page".to_string(),
            engine: "tesseract".to_string(),
            processing_time_ms: 120,
        };
        let a = Artifact::new_child("parent-a", kind.clone());
        let b = Artifact::new_child("parent-b", kind);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_input_has_no_parent() {
        let a = Artifact::new_input(sample_input());
        assert!(a.parent_id.is_none());
        assert!(a.is_input());
        assert_eq!(a.type_name(), "input");
    }

    #[test]
    fn test_coordinate_mapping_roundtrip() {
        let mapping = CoordinateMapping {
            offset_x: 100,
            offset_y: 50,
            scale_x: 0.5,
            scale_y: 0.5,
        };
        let local = BoundingBox::new(10, 20, 40, 8);
        let page = mapping.to_page(&local);
        assert_eq!(page, BoundingBox::new(55, 35, 20, 4));
        let back = mapping.to_zone(&page).unwrap();
        assert_eq!(back, local);
    }

    #[test]
    fn test_mapping_outside_crop_is_none() {
        let mapping = CoordinateMapping {
            offset_x: 100,
            offset_y: 100,
            scale_x: 1.0,
            scale_y: 1.0,
        };
        let page = BoundingBox::new(10, 10, 5, 5);
        assert!(mapping.to_zone(&page).is_none());
    }

    #[test]
    fn test_artifact_json_roundtrip() {
        let artifact = Artifact::new_input(sample_input());
        let json = serde_json::to_string(&artifact).unwrap();
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(artifact, back);
    }
}
