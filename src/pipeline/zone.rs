//! Heuristic zone detection: position priors plus projection-profile
//! signals, no ML.
//!
//! Invoices are laid out predictably enough that simple signals go far:
//! header fields at the top, a line-items table with horizontal rules in
//! the middle band, totals concentrated bottom-right, notes at the foot,
//! barcodes as dense vertical-transition patches, logos in the corners.

use std::path::Path;
use std::time::Instant;

use image::GrayImage;

use crate::config::ZoneConfig;
use crate::error::{PipelineError, Result};
use crate::models::{BoundingBox, NormalizedBox, ZoneProvenance, ZoneType};

/// A classified page region.
#[derive(Debug, Clone)]
pub struct DetectedZone {
    pub zone_type: ZoneType,
    /// Page-space pixel coordinates.
    pub bbox: BoundingBox,
    pub normalized_bbox: NormalizedBox,
    pub confidence: f64,
    /// Lower is more important for OCR ordering.
    pub priority: u32,
    pub provenance: ZoneProvenance,
}

#[derive(Debug)]
pub struct ZoneReport {
    pub zones: Vec<DetectedZone>,
    pub elapsed_ms: u64,
}

pub struct ZoneDetector {
    config: ZoneConfig,
}

const INK_THRESHOLD: u8 = 128;

impl ZoneDetector {
    pub fn new(config: ZoneConfig) -> Self {
        Self { config }
    }

    /// Detect semantic zones on a corrected page image.
    pub fn detect(&self, page_path: &Path) -> Result<ZoneReport> {
        let start = Instant::now();
        let gray = image::open(page_path)
            .map_err(|e| {
                PipelineError::ProcessingFailed(format!(
                    "cannot decode {}: {}",
                    page_path.display(),
                    e
                ))
            })?
            .to_luma8();

        let mut zones = Vec::new();
        zones.extend(self.detect_header(&gray));
        zones.extend(self.detect_line_items(&gray));
        zones.extend(self.detect_totals(&gray));
        zones.extend(self.detect_footer(&gray));
        zones.extend(self.detect_barcode(&gray));
        zones.extend(self.detect_logo(&gray));
        zones.retain(|z| z.confidence >= self.config.min_confidence);
        zones.sort_by_key(|z| z.priority);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.time_budget_ms {
            tracing::warn!(
                elapsed_ms,
                budget_ms = self.config.time_budget_ms,
                "zone detection exceeded its time budget"
            );
        }
        tracing::debug!(zones = zones.len(), elapsed_ms, "zones detected");
        Ok(ZoneReport { zones, elapsed_ms })
    }

    /// Replace or add a zone with an operator-supplied bounding box.
    ///
    /// The override is validated against image bounds and marked with
    /// Manual provenance and full confidence so downstream consumers can
    /// tell it apart from detection output.
    pub fn override_zone(
        &self,
        zones: &mut Vec<DetectedZone>,
        zone_type: ZoneType,
        bbox: BoundingBox,
        img_width: u32,
        img_height: u32,
    ) -> Result<()> {
        if bbox.width == 0 || bbox.height == 0 {
            return Err(PipelineError::InvalidInput(
                "zone override must have positive extent".to_string(),
            ));
        }
        if bbox.right() > img_width || bbox.bottom() > img_height {
            return Err(PipelineError::InvalidInput(format!(
                "zone override {:?} exceeds image bounds {}x{}",
                bbox, img_width, img_height
            )));
        }

        let priority = zones
            .iter()
            .find(|z| z.zone_type == zone_type)
            .map(|z| z.priority)
            .unwrap_or(10);
        zones.retain(|z| z.zone_type != zone_type);
        zones.push(DetectedZone {
            zone_type,
            bbox,
            normalized_bbox: bbox.normalize(img_width, img_height),
            confidence: 1.0,
            priority,
            provenance: ZoneProvenance::Manual,
        });
        zones.sort_by_key(|z| z.priority);
        Ok(())
    }

    /// Header fields: content in the top quarter of the page.
    fn detect_header(&self, gray: &GrayImage) -> Option<DetectedZone> {
        let region = band(gray, 0.0, 0.28);
        let bbox = tight_ink_bbox(gray, &region)?;
        let density = ink_density(gray, &bbox);
        Some(self.zone(
            ZoneType::HeaderFields,
            bbox,
            gray,
            (density * 8.0).clamp(0.3, 0.9),
            3,
        ))
    }

    /// Line-items table: repeated horizontal structure in the middle band.
    fn detect_line_items(&self, gray: &GrayImage) -> Option<DetectedZone> {
        let region = band(gray, 0.28, 0.70);
        let bbox = tight_ink_bbox(gray, &region)?;
        let rules = horizontal_rule_rows(gray, &region);
        let text_rows = inked_row_count(gray, &region);
        if rules == 0 && text_rows < 5 {
            return None;
        }
        // Tables with visible rules score higher than bare text stacks.
        let confidence = (0.35 + 0.12 * rules as f64 + 0.01 * text_rows as f64).min(0.95);
        Some(self.zone(ZoneType::LineItemsTable, bbox, gray, confidence, 2))
    }

    /// Totals box: ink concentrated in the bottom-right quadrant.
    fn detect_totals(&self, gray: &GrayImage) -> Option<DetectedZone> {
        let (w, h) = (gray.width(), gray.height());
        let region = BoundingBox::new(w / 2, (h as f64 * 0.60) as u32, w / 2, (h as f64 * 0.32) as u32);
        let bbox = tight_ink_bbox(gray, &region)?;
        let density = ink_density(gray, &bbox);
        let page_density = ink_density(
            gray,
            &BoundingBox::new(0, 0, w, h),
        );
        // Concentration relative to the page at large is the signal.
        let concentration = if page_density > 0.0 {
            (density / page_density).min(4.0) / 4.0
        } else {
            0.0
        };
        Some(self.zone(
            ZoneType::TotalsBox,
            bbox,
            gray,
            (0.3 + 0.6 * concentration).min(0.95),
            1,
        ))
    }

    /// Footer notes: anything in the bottom strip.
    fn detect_footer(&self, gray: &GrayImage) -> Option<DetectedZone> {
        let region = band(gray, 0.92, 1.0);
        let bbox = tight_ink_bbox(gray, &region)?;
        Some(self.zone(ZoneType::FooterNotes, bbox, gray, 0.4, 5))
    }

    /// Barcodes read as patches with very high horizontal transition
    /// density (many thin vertical bars).
    fn detect_barcode(&self, gray: &GrayImage) -> Option<DetectedZone> {
        let (w, h) = (gray.width(), gray.height());
        let cell_w = w / 8;
        let cell_h = h / 8;
        if cell_w == 0 || cell_h == 0 {
            return None;
        }

        let mut best: Option<(BoundingBox, f64)> = None;
        for row in 0..8 {
            for col in 0..8 {
                let cell = BoundingBox::new(col * cell_w, row * cell_h, cell_w, cell_h);
                let transitions = horizontal_transition_density(gray, &cell);
                if transitions > 0.18
                    && best.as_ref().map_or(true, |(_, t)| transitions > *t)
                {
                    best = Some((cell, transitions));
                }
            }
        }
        let (bbox, transitions) = best?;
        Some(self.zone(
            ZoneType::BarcodeArea,
            bbox,
            gray,
            (transitions * 3.0).min(0.9),
            6,
        ))
    }

    /// Logos: compact ink blocks in the top corners.
    fn detect_logo(&self, gray: &GrayImage) -> Option<DetectedZone> {
        let (w, h) = (gray.width(), gray.height());
        let corner_w = (w as f64 * 0.20) as u32;
        let corner_h = (h as f64 * 0.15) as u32;
        for corner in [
            BoundingBox::new(0, 0, corner_w, corner_h),
            BoundingBox::new(w - corner_w, 0, corner_w, corner_h),
        ] {
            if let Some(bbox) = tight_ink_bbox(gray, &corner) {
                let density = ink_density(gray, &bbox);
                if density > 0.25 {
                    return Some(self.zone(
                        ZoneType::LogoArea,
                        bbox,
                        gray,
                        (density * 1.2).min(0.85),
                        7,
                    ));
                }
            }
        }
        None
    }

    fn zone(
        &self,
        zone_type: ZoneType,
        bbox: BoundingBox,
        gray: &GrayImage,
        confidence: f64,
        priority: u32,
    ) -> DetectedZone {
        DetectedZone {
            zone_type,
            bbox,
            normalized_bbox: bbox.normalize(gray.width(), gray.height()),
            confidence,
            priority,
            provenance: ZoneProvenance::Detected,
        }
    }
}

/// Full-width horizontal band between two normalized heights.
fn band(gray: &GrayImage, top: f64, bottom: f64) -> BoundingBox {
    let h = gray.height();
    let y = (h as f64 * top) as u32;
    let height = ((h as f64 * (bottom - top)) as u32).max(1);
    BoundingBox::new(0, y, gray.width(), height.min(h - y))
}

/// Smallest box containing all ink within `region`, or None when blank.
fn tight_ink_bbox(gray: &GrayImage, region: &BoundingBox) -> Option<BoundingBox> {
    let region = region.clamped(gray.width(), gray.height());
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;
    for y in region.y..region.bottom() {
        for x in region.x..region.right() {
            if gray.get_pixel(x, y).0[0] < INK_THRESHOLD {
                found = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }
    if !found {
        return None;
    }
    Some(BoundingBox::new(
        min_x,
        min_y,
        max_x - min_x + 1,
        max_y - min_y + 1,
    ))
}

fn ink_density(gray: &GrayImage, bbox: &BoundingBox) -> f64 {
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

/// Rows within the region where ink spans most of the width — table rules.
fn horizontal_rule_rows(gray: &GrayImage, region: &BoundingBox) -> usize {
    let region = region.clamped(gray.width(), gray.height());
    let mut rules = 0;
    let mut previous_was_rule = false;
    for y in region.y..region.bottom() {
        let ink: u32 = (region.x..region.right())
            .filter(|&x| gray.get_pixel(x, y).0[0] < INK_THRESHOLD)
            .count() as u32;
        let is_rule = ink as f64 >= region.width as f64 * 0.6;
        if is_rule && !previous_was_rule {
            rules += 1;
        }
        previous_was_rule = is_rule;
    }
    rules
}

/// Rows that contain a meaningful amount of ink (text rows).
fn inked_row_count(gray: &GrayImage, region: &BoundingBox) -> usize {
    let region = region.clamped(gray.width(), gray.height());
    let mut rows = 0;
    for y in region.y..region.bottom() {
        let ink = (region.x..region.right())
            .filter(|&x| gray.get_pixel(x, y).0[0] < INK_THRESHOLD)
            .count();
        if ink as f64 >= region.width as f64 * 0.05 {
            rows += 1;
        }
    }
    rows
}

/// Average light/dark transitions per pixel along rows of the region.
fn horizontal_transition_density(gray: &GrayImage, bbox: &BoundingBox) -> f64 {
    let bbox = bbox.clamped(gray.width(), gray.height());
    if bbox.width < 2 || bbox.height == 0 {
        return 0.0;
    }
    let mut transitions = 0u64;
    for y in bbox.y..bbox.bottom() {
        let mut previous = gray.get_pixel(bbox.x, y).0[0] < INK_THRESHOLD;
        for x in (bbox.x + 1)..bbox.right() {
            let current = gray.get_pixel(x, y).0[0] < INK_THRESHOLD;
            if current != previous {
                transitions += 1;
            }
            previous = current;
        }
    }
    transitions as f64 / bbox.area() as f64
}
