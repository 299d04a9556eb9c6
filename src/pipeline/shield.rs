//! Cleanup shield engine: noise detection and precedence resolution.
//!
//! Detection is heuristic and fail-open: any internal error yields zero
//! shields rather than blocking OCR. Resolution merges shields from four
//! sources under strict precedence (session override > template rule >
//! vendor rule > auto-detected) and demotes anything that covers too much
//! of a business-critical zone.

use std::path::Path;

use image::GrayImage;

use crate::config::ShieldConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    ApplyMode, CleanupShield, NormalizedBox, PageTarget, RiskLevel, ShieldType, ZoneType,
};

/// Why a shield ended up active or inactive after precedence resolution.
#[derive(Debug, Clone)]
pub struct ShieldExplanation {
    pub shield_id: String,
    pub active: bool,
    pub message: String,
}

/// A shield overlapping a business-critical zone.
#[derive(Debug, Clone)]
pub struct ZoneConflict {
    pub shield_id: String,
    pub zone_type: ZoneType,
    pub overlap_ratio: f64,
    /// True when the overlap forced the shield out of Applied mode.
    pub blocked: bool,
    pub message: String,
}

/// Output of precedence resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolvedShields {
    /// Shields that survived, with modes and risk adjusted.
    pub shields: Vec<CleanupShield>,
    pub explanations: Vec<ShieldExplanation>,
    pub conflicts: Vec<ZoneConflict>,
}

pub struct ShieldEngine {
    config: ShieldConfig,
}

/// Pixels darker than this count as ink for density heuristics.
const INK_THRESHOLD: u8 = 128;

impl ShieldEngine {
    pub fn new(config: ShieldConfig) -> Self {
        Self { config }
    }

    /// Fail-open wrapper around auto-detection: internal errors yield an
    /// empty shield set and a warning, never an error to the caller.
    pub fn auto_detect_shields_safe(&self, page_paths: &[&Path]) -> Vec<CleanupShield> {
        match self.auto_detect(page_paths) {
            Ok(shields) => shields,
            Err(e) => {
                tracing::warn!(error = %e, "shield auto-detection failed, continuing without shields");
                Vec::new()
            }
        }
    }

    /// Detect candidate noise regions across a document's pages.
    pub fn auto_detect(&self, page_paths: &[&Path]) -> Result<Vec<CleanupShield>> {
        let mut per_page: Vec<Vec<CleanupShield>> = Vec::with_capacity(page_paths.len());
        for path in page_paths {
            let gray = image::open(path)
                .map_err(|e| {
                    PipelineError::ProcessingFailed(format!(
                        "cannot decode {}: {}",
                        path.display(),
                        e
                    ))
                })?
                .to_luma8();
            per_page.push(self.detect_on_page(&gray));
        }
        let merged = self.merge_across_pages(per_page);
        Ok(merged
            .into_iter()
            .filter(|s| s.confidence >= self.config.min_confidence)
            .collect())
    }

    /// Run all single-page heuristics.
    fn detect_on_page(&self, gray: &GrayImage) -> Vec<CleanupShield> {
        let mut shields = Vec::new();
        shields.extend(self.detect_logos(gray));
        shields.extend(self.detect_watermark(gray));
        shields.extend(self.detect_repetitive_bands(gray));
        shields
    }

    /// Logos live in the top corners. Search two regions of roughly 20%
    /// width by 15% height and flag any with plausible ink coverage.
    fn detect_logos(&self, gray: &GrayImage) -> Vec<CleanupShield> {
        let cw = self.config.logo_corner_width;
        let ch = self.config.logo_corner_height;
        let corners = [
            NormalizedBox::new(0.0, 0.0, cw, ch),
            NormalizedBox::new(1.0 - cw, 0.0, cw, ch),
        ];

        let mut shields = Vec::new();
        for corner in corners {
            let density = ink_density(gray, &corner);
            // Solid text blocks run much denser; blank corners much sparser.
            if (0.03..=0.60).contains(&density) {
                let confidence = (density * 2.5).clamp(0.3, 0.9);
                shields.push(CleanupShield::auto_detected(
                    ShieldType::Logo,
                    corner,
                    confidence,
                ));
            }
        }
        shields
    }

    /// Watermarks show as low-contrast mid-gray coverage in the page
    /// center.
    fn detect_watermark(&self, gray: &GrayImage) -> Vec<CleanupShield> {
        let center = NormalizedBox::new(0.30, 0.35, 0.40, 0.30);
        let stats = region_stats(gray, &center);
        if stats.mid_gray_fraction > 0.15 && stats.std_dev < 60.0 {
            let confidence = (0.35 + stats.mid_gray_fraction).min(0.85);
            vec![CleanupShield::auto_detected(
                ShieldType::Watermark,
                center,
                confidence,
            )]
        } else {
            Vec::new()
        }
    }

    /// Repetitive headers and footers sit in thin bands at the page edges.
    fn detect_repetitive_bands(&self, gray: &GrayImage) -> Vec<CleanupShield> {
        let mut shields = Vec::new();
        let header_band = NormalizedBox::new(0.0, 0.0, 1.0, 0.06);
        let footer_band = NormalizedBox::new(0.0, 0.94, 1.0, 0.06);

        if ink_density(gray, &header_band) > 0.02 {
            shields.push(CleanupShield::auto_detected(
                ShieldType::RepetitiveHeader,
                header_band,
                0.35,
            ));
        }
        if ink_density(gray, &footer_band) > 0.02 {
            shields.push(CleanupShield::auto_detected(
                ShieldType::RepetitiveFooter,
                footer_band,
                0.35,
            ));
        }
        shields
    }

    /// Collapse per-page detections: a pattern repeating at the same
    /// normalized location on multiple pages is more trustworthy.
    fn merge_across_pages(&self, per_page: Vec<Vec<CleanupShield>>) -> Vec<CleanupShield> {
        let page_count = per_page.len();
        let mut merged: Vec<(CleanupShield, usize)> = Vec::new();

        for shields in per_page {
            for shield in shields {
                if let Some((existing, seen)) = merged.iter_mut().find(|(m, _)| {
                    m.shield_type == shield.shield_type
                        && m.bbox.overlap_ratio(&shield.bbox) > 0.5
                }) {
                    *seen += 1;
                    existing.confidence = existing.confidence.max(shield.confidence);
                } else {
                    merged.push((shield, 1));
                }
            }
        }

        merged
            .into_iter()
            .map(|(mut shield, seen)| {
                if page_count > 1 && seen > 1 {
                    shield.confidence =
                        (shield.confidence + self.config.cross_page_boost).min(1.0);
                    shield.page_target = PageTarget::All;
                }
                shield
            })
            .collect()
    }

    /// Merge shields from all sources under precedence, then apply
    /// critical-zone protection.
    ///
    /// `zones` supplies the detected zone layout of the page; only
    /// business-critical zones participate in conflict checks.
    pub fn resolve(
        &self,
        shields: Vec<CleanupShield>,
        zones: &[(ZoneType, NormalizedBox)],
    ) -> ResolvedShields {
        let mut result = ResolvedShields::default();

        // Highest precedence first so earlier shields claim regions.
        let mut ordered = shields;
        ordered.sort_by(|a, b| b.origin.cmp(&a.origin).then(
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal),
        ));

        let mut winners: Vec<CleanupShield> = Vec::new();
        for shield in ordered {
            let conflict = winners.iter().find(|w| {
                shield.bbox.overlap_ratio(&w.bbox) >= self.config.conflict_overlap_ratio
                    || w.bbox.overlap_ratio(&shield.bbox) >= self.config.conflict_overlap_ratio
            });
            match conflict {
                Some(winner) => {
                    result.explanations.push(ShieldExplanation {
                        shield_id: shield.id.clone(),
                        active: false,
                        message: format!(
                            "superseded by {} shield over the same region",
                            winner.origin.as_str()
                        ),
                    });
                }
                None => {
                    result.explanations.push(ShieldExplanation {
                        shield_id: shield.id.clone(),
                        active: true,
                        message: format!(
                            "{} shield accepted with no higher-precedence conflict",
                            shield.origin.as_str()
                        ),
                    });
                    winners.push(shield);
                }
            }
        }

        // Critical-zone protection on the surviving set.
        for shield in &mut winners {
            for (zone_type, zone_box) in zones {
                if !zone_type.is_business_critical() {
                    continue;
                }
                let overlap = shield.bbox.overlap_ratio(zone_box);
                if overlap > self.config.block_overlap_ratio {
                    shield.mode = ApplyMode::Suggested;
                    shield.risk = RiskLevel::High;
                    result.conflicts.push(ZoneConflict {
                        shield_id: shield.id.clone(),
                        zone_type: *zone_type,
                        overlap_ratio: overlap,
                        blocked: true,
                        message: format!(
                            "shield covers {:.1}% of {} and was demoted to suggested",
                            overlap * 100.0,
                            zone_type
                        ),
                    });
                } else if overlap > self.config.warn_overlap_ratio {
                    result.conflicts.push(ZoneConflict {
                        shield_id: shield.id.clone(),
                        zone_type: *zone_type,
                        overlap_ratio: overlap,
                        blocked: false,
                        message: format!(
                            "shield covers {:.1}% of {}",
                            overlap * 100.0,
                            zone_type
                        ),
                    });
                }
            }
        }

        result.shields = winners;
        result
    }
}

/// Fraction of ink pixels within a normalized region.
fn ink_density(gray: &GrayImage, region: &NormalizedBox) -> f64 {
    let bbox = region.denormalize(gray.width(), gray.height());
    let bbox = bbox.clamped(gray.width(), gray.height());
    if bbox.area() == 0 {
        return 0.0;
    }
    let mut ink = 0u64;
    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            if gray.get_pixel(x, y).0[0] < INK_THRESHOLD {
                ink += 1;
            }
        }
    }
    ink as f64 / bbox.area() as f64
}

struct RegionStats {
    std_dev: f64,
    mid_gray_fraction: f64,
}

fn region_stats(gray: &GrayImage, region: &NormalizedBox) -> RegionStats {
    let bbox = region
        .denormalize(gray.width(), gray.height())
        .clamped(gray.width(), gray.height());
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut mid = 0u64;
    let mut count = 0u64;
    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            let v = gray.get_pixel(x, y).0[0] as f64;
            sum += v;
            sum_sq += v * v;
            if (80.0..=210.0).contains(&v) {
                mid += 1;
            }
            count += 1;
        }
    }
    if count == 0 {
        return RegionStats {
            std_dev: 0.0,
            mid_gray_fraction: 0.0,
        };
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    RegionStats {
        std_dev: variance.sqrt(),
        mid_gray_fraction: mid as f64 / count as f64,
    }
}
