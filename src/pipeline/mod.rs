//! Pipeline stages and the document runner.

pub mod crop;
pub mod orientation;
pub mod rules;
pub mod shield;
pub mod variant;
pub mod zone;

pub use crop::{CroppedZone, ZoneCropper};
pub use orientation::{OrientationResult, OrientationService};
pub use rules::{FileShieldRuleStore, RuleScope, ShieldRule, ShieldRuleStore};
pub use shield::{ResolvedShields, ShieldEngine, ZoneConflict};
pub use variant::{GeneratedVariant, VariantGenerator, VariantReport};
pub use zone::{DetectedZone, ZoneDetector};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::IngestService;
use crate::models::{ApplyMode, Artifact, ArtifactKind, CleanupShield, ReviewCase};
use crate::ocr::{OcrEngine, OcrOrchestrator};
use crate::resolve::{CandidateGenerator, FieldResolver, SourceText};
use crate::review::ReviewService;
use crate::store::ArtifactStore;

/// Per-page outcome of a pipeline run.
#[derive(Debug)]
pub struct PageReport {
    pub page_number: u32,
    pub rotation_applied: u32,
    pub skew_applied: f64,
    pub orientation_confidence: f64,
    pub shields: ResolvedShields,
    pub variants_generated: usize,
    pub variants_kept: usize,
    pub zones_detected: usize,
    pub ocr_attempts: usize,
}

/// Full outcome of one document run.
#[derive(Debug)]
pub struct PipelineReport {
    pub input_artifact_id: String,
    pub pages: Vec<PageReport>,
    pub review_case: ReviewCase,
    pub elapsed_ms: u64,
}

/// Runs every stage in order for one document and opens a review case.
pub struct PipelineRunner {
    config: PipelineConfig,
    store: Arc<ArtifactStore>,
    engine: Arc<dyn OcrEngine>,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig, store: Arc<ArtifactStore>, engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            config,
            store,
            engine,
        }
    }

    pub async fn run_document(
        &self,
        path: &Path,
        vendor_id: Option<&str>,
        rule_shields: Vec<CleanupShield>,
        review: &ReviewService,
    ) -> Result<PipelineReport> {
        let start = Instant::now();

        let ingest = IngestService::new(self.config.ingest.clone(), self.store.clone());
        let ingested = ingest.ingest(path)?;
        let input_hash = match &ingested.input.kind {
            ArtifactKind::Input { content_hash, .. } => content_hash.clone(),
            _ => {
                return Err(PipelineError::ProcessingFailed(
                    "ingest produced a non-input root artifact".to_string(),
                ))
            }
        };
        let work_dir = self.store.image_dir(&input_hash)?;

        let orientation = OrientationService::new(self.config.orientation.clone());
        let shield_engine = ShieldEngine::new(self.config.shields.clone());
        let zone_detector = ZoneDetector::new(self.config.zones.clone());
        let variant_generator = VariantGenerator::new(self.config.variants.clone());
        let cropper = ZoneCropper::new(self.config.zones.clone());
        let orchestrator = OcrOrchestrator::new(self.config.ocr.clone(), self.engine.clone());
        let candidate_generator = CandidateGenerator::new(self.config.resolver.clone());
        let resolver = FieldResolver::new(self.config.resolver.clone());

        // Auto-detection sees every page so cross-page patterns can boost
        // shield confidence. Fail-open: detection errors mean no shields.
        let page_paths: Vec<&Path> = ingested
            .pages
            .iter()
            .filter_map(|p| match &p.kind {
                ArtifactKind::Page { image_path, .. } => Some(image_path.as_path()),
                _ => None,
            })
            .collect();
        let mut all_shields = shield_engine.auto_detect_shields_safe(&page_paths);
        all_shields.extend(rule_shields);

        let mut pages = Vec::new();
        let mut sources: Vec<SourceText> = Vec::new();

        for page in &ingested.pages {
            let ArtifactKind::Page {
                page_number,
                image_path,
                dpi,
                ..
            } = &page.kind
            else {
                continue;
            };

            let corrected_path = work_dir.join(format!("corrected-{}.png", page_number));
            let oriented = orientation.correct(image_path, &corrected_path)?;
            let (width, height) = image::image_dimensions(&oriented.image_path)
                .map_err(|e| PipelineError::ProcessingFailed(e.to_string()))?;
            let corrected = Artifact::new_child(
                &ingested.input.id,
                ArtifactKind::Page {
                    page_number: *page_number,
                    image_path: oriented.image_path.clone(),
                    width,
                    height,
                    dpi: *dpi,
                    rotation_applied: oriented.rotation,
                    skew_applied: oriented.skew_angle,
                },
            );
            self.store.store(&corrected)?;

            let zone_report = zone_detector.detect(&oriented.image_path)?;
            let zone_layout: Vec<_> = zone_report
                .zones
                .iter()
                .map(|z| (z.zone_type, z.normalized_bbox))
                .collect();
            let resolved_shields = shield_engine.resolve(
                all_shields
                    .iter()
                    .filter(|s| s.applies_to_page(*page_number, ingested.pages.len() as u32))
                    .cloned()
                    .collect(),
                &zone_layout,
            );

            let variant_dir = work_dir.join(format!("variants-{}", page_number));
            let variant_report = variant_generator.generate(
                &oriented.image_path,
                &resolved_shields.shields,
                &variant_dir,
            )?;
            let mut variant_ids = Vec::new();
            for v in &variant_report.variants {
                let artifact = Artifact::new_child(
                    &corrected.id,
                    ArtifactKind::Variant {
                        variant_type: v.variant_type,
                        image_path: v.image_path.clone(),
                        width: v.width,
                        height: v.height,
                        readiness_score: v.score.readiness,
                    },
                );
                self.store.store(&artifact)?;
                variant_ids.push(artifact.id);
            }

            let crop_dir = work_dir.join(format!("crops-{}", page_number));
            let batches = cropper.crop_batch(
                &variant_report.variants,
                &zone_report.zones,
                &resolved_shields.shields,
                &crop_dir,
            )?;
            let ocr_report = orchestrator.run(&batches).await?;

            for best in ocr_report.zone_results.values() {
                let Some(variant_id) = variant_ids.get(best.variant_rank) else {
                    continue;
                };
                let zone_artifact = Artifact::new_child(
                    variant_id,
                    ArtifactKind::Zone {
                        zone_type: best.crop.zone.zone_type,
                        image_path: best.crop.image_path.clone(),
                        bbox: best.crop.zone.bbox,
                        normalized_bbox: best.crop.zone.normalized_bbox,
                        confidence: best.crop.zone.confidence,
                        provenance: best.crop.zone.provenance,
                        mapping: best.crop.mapping,
                    },
                );
                self.store.store(&zone_artifact)?;
                let ocr_artifact = Artifact::new_child(
                    &zone_artifact.id,
                    ArtifactKind::Ocr {
                        text: best.result.text.clone(),
                        avg_confidence: best.result.avg_confidence,
                        words: best.result.words.clone(),
                        profile: best.result.profile_used.clone(),
                        engine: best.result.engine_name.clone(),
                        processing_time_ms: best.result.processing_time_ms,
                    },
                );
                self.store.store(&ocr_artifact)?;

                sources.push(SourceText {
                    zone_type: best.crop.zone.zone_type,
                    text: best.result.text.clone(),
                    avg_confidence: best.result.avg_confidence,
                    artifact_id: ocr_artifact.id,
                });
            }

            pages.push(PageReport {
                page_number: *page_number,
                rotation_applied: oriented.rotation,
                skew_applied: oriented.skew_angle,
                orientation_confidence: oriented.confidence,
                shields: resolved_shields,
                variants_generated: variant_report.generated_count,
                variants_kept: variant_report.variants.len(),
                zones_detected: zone_report.zones.len(),
                ocr_attempts: ocr_report.executed_attempts(),
            });
        }

        let candidates = candidate_generator.generate(&sources, vendor_id);
        let resolved = resolver.resolve(&candidates);
        for field in &resolved.fields {
            if !field.value.is_empty() {
                let artifact = Artifact::new_child(
                    // Candidates aggregate across zones, so they hang off
                    // the input root.
                    &ingested.input.id,
                    ArtifactKind::Candidate {
                        field: field.field.clone(),
                        raw_value: field.value.clone(),
                        normalized_value: field.normalized_value.clone(),
                        score: field.confidence,
                        evidence: field.evidence.clone(),
                        source_artifact_ids: field.source_artifact_ids.clone(),
                    },
                );
                self.store.store(&artifact)?;
            }
        }

        let review_case = review.create_case(&ingested.input.id, vendor_id, &resolved)?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            input = %ingested.input.id,
            case = %review_case.id,
            pages = pages.len(),
            elapsed_ms,
            "pipeline run complete"
        );

        Ok(PipelineReport {
            input_artifact_id: ingested.input.id,
            pages,
            review_case,
            elapsed_ms,
        })
    }
}

/// Draw shield outlines over a page image for visual inspection.
///
/// Applied shields draw red, suggested draw amber, disabled draw gray.
pub fn render_shield_overlay(
    page_path: &Path,
    shields: &[CleanupShield],
    output_path: &Path,
) -> Result<()> {
    let mut img = image::open(page_path)
        .map_err(|e| {
            PipelineError::ProcessingFailed(format!("cannot decode {}: {}", page_path.display(), e))
        })?
        .to_rgb8();
    let (w, h) = (img.width(), img.height());

    for shield in shields {
        let bbox = shield.bbox.denormalize(w, h);
        if bbox.area() == 0 {
            continue;
        }
        let color = match shield.mode {
            ApplyMode::Applied => Rgb([214u8, 48, 49]),
            ApplyMode::Suggested => Rgb([253u8, 203, 110]),
            ApplyMode::Disabled => Rgb([128u8, 128, 128]),
        };
        // 2px outline.
        for inset in 0..2u32 {
            if bbox.width > inset * 2 && bbox.height > inset * 2 {
                let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32)
                    .of_size(bbox.width - inset * 2, bbox.height - inset * 2);
                draw_hollow_rect_mut(&mut img, rect, color);
            }
        }
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save(output_path)
        .map_err(|e| PipelineError::ProcessingFailed(format!("saving overlay: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedBox, ShieldType};
    use image::GrayImage;
    use tempfile::tempdir;

    #[test]
    fn test_overlay_draws_shield_outline() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("page.png");
        GrayImage::from_pixel(200, 200, image::Luma([255u8]))
            .save(&page)
            .unwrap();

        let mut shield = CleanupShield::auto_detected(
            ShieldType::Logo,
            NormalizedBox::new(0.25, 0.25, 0.5, 0.5),
            0.9,
        );
        shield.mode = ApplyMode::Applied;

        let out = dir.path().join("overlay.png");
        render_shield_overlay(&page, &[shield], &out).unwrap();

        let rendered = image::open(&out).unwrap().to_rgb8();
        // Top-left corner of the shield box at (50, 50) carries the
        // applied color; the page center stays white.
        assert_eq!(rendered.get_pixel(50, 50).0, [214, 48, 49]);
        assert_eq!(rendered.get_pixel(100, 100).0, [255, 255, 255]);
    }

    #[test]
    fn test_overlay_with_no_shields_copies_page() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("page.png");
        GrayImage::from_pixel(50, 50, image::Luma([200u8]))
            .save(&page)
            .unwrap();
        let out = dir.path().join("overlay.png");
        render_shield_overlay(&page, &[], &out).unwrap();
        assert!(out.exists());
    }
}
