//! Data model for the invoice enhancement pipeline.
//!
//! Artifacts carry provenance through the pipeline; shields, fields, and
//! review cases are the domain objects built on top of them.

mod artifact;
mod bbox;
mod field;
mod review;
mod shield;

pub use artifact::{
    Artifact, ArtifactKind, CoordinateMapping, DecisionSource, Evidence, EvidenceKind, OcrWord,
    VariantType, ZoneProvenance, ZoneType,
};
pub use bbox::{BoundingBox, NormalizedBox};
pub use field::{AlternativeValue, CalibrationDataPoint, FieldFlag, FieldValue};
pub use review::{ReviewCase, ReviewDecision, ReviewStatus, ValidationIssue, ValidationResult};
pub use shield::{ApplyMode, CleanupShield, PageTarget, RiskLevel, ShieldOrigin, ShieldType};
