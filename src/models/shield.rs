//! Cleanup shield model.
//!
//! A shield marks a normalized page region to be suppressed before OCR:
//! logos, watermarks, repeated headers, rubber stamps. Shields come from
//! four sources (auto-detection, vendor rules, template rules, session
//! overrides) and are merged by the engine in `pipeline::shield`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ZoneType;
use super::bbox::NormalizedBox;

/// What kind of noise a shield covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldType {
    Logo,
    Watermark,
    RepetitiveHeader,
    RepetitiveFooter,
    Stamp,
    UserDefined,
    VendorSpecific,
    TemplateSpecific,
}

impl ShieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Watermark => "watermark",
            Self::RepetitiveHeader => "repetitive_header",
            Self::RepetitiveFooter => "repetitive_footer",
            Self::Stamp => "stamp",
            Self::UserDefined => "user_defined",
            Self::VendorSpecific => "vendor_specific",
            Self::TemplateSpecific => "template_specific",
        }
    }
}

/// Whether a shield actually masks pixels or is only proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Region is filled before OCR.
    Applied,
    /// Proposed to the operator, not applied.
    Suggested,
    /// Kept for audit, never applied.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Which pages of a document a shield applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTarget {
    All,
    First,
    Last,
    Specific(u32),
}

impl PageTarget {
    pub fn matches(&self, page_number: u32, total_pages: u32) -> bool {
        match self {
            Self::All => true,
            Self::First => page_number == 1,
            Self::Last => page_number == total_pages,
            Self::Specific(n) => page_number == *n,
        }
    }
}

/// Origin of a shield, ordered by merge precedence (highest wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldOrigin {
    AutoDetected,
    VendorRule,
    TemplateRule,
    SessionOverride,
}

impl ShieldOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoDetected => "auto-detected",
            Self::VendorRule => "vendor rule",
            Self::TemplateRule => "template rule",
            Self::SessionOverride => "session override",
        }
    }
}

/// A region to suppress before OCR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupShield {
    pub id: String,
    pub shield_type: ShieldType,
    pub bbox: NormalizedBox,
    pub mode: ApplyMode,
    pub risk: RiskLevel,
    /// 0.0-1.0. User-defined shields are always 1.0.
    pub confidence: f64,
    pub origin: ShieldOrigin,
    pub page_target: PageTarget,
    /// When non-empty, the shield only applies inside these zones.
    #[serde(default)]
    pub include_zones: Vec<ZoneType>,
    /// Zones the shield must never apply inside.
    #[serde(default)]
    pub exclude_zones: Vec<ZoneType>,
    pub created_at: DateTime<Utc>,
    /// User id for user-defined shields.
    pub created_by: Option<String>,
    /// Free-text reason supplied when a user defines a shield.
    pub reason: Option<String>,
}

impl CleanupShield {
    /// An auto-detected shield. Defaults to `Suggested` so nothing masks
    /// pixels without either high confidence promotion or operator consent.
    pub fn auto_detected(shield_type: ShieldType, bbox: NormalizedBox, confidence: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            shield_type,
            bbox,
            mode: ApplyMode::Suggested,
            risk: RiskLevel::Low,
            confidence,
            origin: ShieldOrigin::AutoDetected,
            page_target: PageTarget::All,
            include_zones: Vec::new(),
            exclude_zones: Vec::new(),
            created_at: Utc::now(),
            created_by: None,
            reason: None,
        }
    }

    /// A user-defined shield with audit metadata. Full confidence, applied.
    pub fn user_defined(bbox: NormalizedBox, user_id: &str, reason: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            shield_type: ShieldType::UserDefined,
            bbox,
            mode: ApplyMode::Applied,
            risk: RiskLevel::Low,
            confidence: 1.0,
            origin: ShieldOrigin::SessionOverride,
            page_target: PageTarget::All,
            include_zones: Vec::new(),
            exclude_zones: Vec::new(),
            created_at: Utc::now(),
            created_by: Some(user_id.to_string()),
            reason: Some(reason.to_string()),
        }
    }

    /// Whether this shield should mask pixels on the given page.
    pub fn applies_to_page(&self, page_number: u32, total_pages: u32) -> bool {
        self.mode == ApplyMode::Applied && self.page_target.matches(page_number, total_pages)
    }

    /// Whether the shield is allowed to act inside the given zone type.
    pub fn allows_zone(&self, zone: ZoneType) -> bool {
        if self.exclude_zones.contains(&zone) {
            return false;
        }
        self.include_zones.is_empty() || self.include_zones.contains(&zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> NormalizedBox {
        NormalizedBox::new(0.0, 0.0, 0.2, 0.1)
    }

    #[test]
    fn test_auto_detected_defaults_to_suggested() {
        let s = CleanupShield::auto_detected(ShieldType::Logo, region(), 0.8);
        assert_eq!(s.mode, ApplyMode::Suggested);
        assert_eq!(s.origin, ShieldOrigin::AutoDetected);
    }

    #[test]
    fn test_user_defined_full_confidence() {
        let s = CleanupShield::user_defined(region(), "u-42", "recurring fax header");
        assert_eq!(s.confidence, 1.0);
        assert_eq!(s.mode, ApplyMode::Applied);
        assert_eq!(s.created_by.as_deref(), Some("u-42"));
        assert_eq!(s.reason.as_deref(), Some("recurring fax header"));
    }

    #[test]
    fn test_page_target_matching() {
        assert!(PageTarget::All.matches(3, 5));
        assert!(PageTarget::First.matches(1, 5));
        assert!(!PageTarget::First.matches(2, 5));
        assert!(PageTarget::Last.matches(5, 5));
        assert!(PageTarget::Specific(3).matches(3, 5));
        assert!(!PageTarget::Specific(3).matches(4, 5));
    }

    #[test]
    fn test_origin_precedence_order() {
        assert!(ShieldOrigin::SessionOverride > ShieldOrigin::TemplateRule);
        assert!(ShieldOrigin::TemplateRule > ShieldOrigin::VendorRule);
        assert!(ShieldOrigin::VendorRule > ShieldOrigin::AutoDetected);
    }

    #[test]
    fn test_zone_targeting() {
        let mut s = CleanupShield::auto_detected(ShieldType::Watermark, region(), 0.5);
        assert!(s.allows_zone(ZoneType::HeaderFields));
        s.exclude_zones.push(ZoneType::TotalsBox);
        assert!(!s.allows_zone(ZoneType::TotalsBox));
        s.include_zones.push(ZoneType::FooterNotes);
        assert!(s.allows_zone(ZoneType::FooterNotes));
        assert!(!s.allows_zone(ZoneType::HeaderFields));
    }
}
