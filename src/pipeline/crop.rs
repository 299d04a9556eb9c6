//! Zone cropping with shield application and coordinate mappings.
//!
//! Zones are detected in page space but cropped out of (possibly scaled)
//! preprocessing variants. Every crop records a bidirectional coordinate
//! mapping so OCR word boxes can be projected back onto the original page
//! for highlighting and audit.

use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::config::ZoneConfig;
use crate::error::{PipelineError, Result};
use crate::models::{ApplyMode, CleanupShield, CoordinateMapping};
use crate::pipeline::variant::GeneratedVariant;
use crate::pipeline::zone::DetectedZone;

/// A zone cropped from one variant, ready for OCR.
#[derive(Debug, Clone)]
pub struct CroppedZone {
    pub zone: DetectedZone,
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Maps crop-local coordinates back to original page coordinates.
    pub mapping: CoordinateMapping,
}

pub struct ZoneCropper {
    config: ZoneConfig,
}

impl ZoneCropper {
    pub fn new(config: ZoneConfig) -> Self {
        Self { config }
    }

    /// Crop every zone from one variant, applying overlapping shields.
    pub fn crop_zones(
        &self,
        variant: &GeneratedVariant,
        zones: &[DetectedZone],
        shields: &[CleanupShield],
        output_dir: &Path,
    ) -> Result<Vec<CroppedZone>> {
        let variant_img = image::open(&variant.image_path)
            .map_err(|e| {
                PipelineError::ProcessingFailed(format!(
                    "cannot decode variant {}: {}",
                    variant.image_path.display(),
                    e
                ))
            })?
            .to_luma8();
        std::fs::create_dir_all(output_dir)?;

        let (vw, vh) = (variant_img.width(), variant_img.height());
        let mut crops = Vec::with_capacity(zones.len());
        for zone in zones {
            // Zone boxes are normalized against the page; project onto the
            // variant's resolution and pad.
            let zone_on_variant = zone
                .normalized_bbox
                .denormalize(vw, vh)
                .padded(self.config.crop_padding_px, vw, vh);
            if zone_on_variant.area() == 0 {
                continue;
            }

            let mut crop = image::imageops::crop_imm(
                &variant_img,
                zone_on_variant.x,
                zone_on_variant.y,
                zone_on_variant.width,
                zone_on_variant.height,
            )
            .to_image();

            apply_shields(&mut crop, zone, shields, &zone_on_variant, vw, vh);

            let path = output_dir.join(format!(
                "{}-{}.png",
                variant.variant_type.as_str(),
                zone.zone_type.as_str()
            ));
            crop.save(&path).map_err(|e| {
                PipelineError::ProcessingFailed(format!("saving zone crop: {}", e))
            })?;

            // Page dimensions are recovered from the normalized zone box:
            // the variant is a scaled rendering of the same page.
            let scale_x = zone.bbox.width as f64
                / zone.normalized_bbox.denormalize(vw, vh).width.max(1) as f64;
            let scale_y = zone.bbox.height as f64
                / zone.normalized_bbox.denormalize(vw, vh).height.max(1) as f64;

            crops.push(CroppedZone {
                zone: zone.clone(),
                image_path: path,
                width: crop.width(),
                height: crop.height(),
                mapping: CoordinateMapping {
                    offset_x: zone_on_variant.x,
                    offset_y: zone_on_variant.y,
                    scale_x,
                    scale_y,
                },
            });
        }
        Ok(crops)
    }

    /// Crop the same zone set across several ranked variants.
    pub fn crop_batch(
        &self,
        variants: &[GeneratedVariant],
        zones: &[DetectedZone],
        shields: &[CleanupShield],
        output_dir: &Path,
    ) -> Result<Vec<(usize, Vec<CroppedZone>)>> {
        let mut out = Vec::with_capacity(variants.len());
        for (rank, variant) in variants.iter().enumerate() {
            match self.crop_zones(variant, zones, shields, output_dir) {
                Ok(crops) => out.push((rank, crops)),
                Err(e) => {
                    // A single unusable variant is skipped, not fatal.
                    tracing::warn!(
                        variant = variant.variant_type.as_str(),
                        error = %e,
                        "cropping variant failed"
                    );
                }
            }
        }
        Ok(out)
    }
}

/// Fill the crop-local intersection of each applied shield with paper
/// white.
fn apply_shields(
    crop: &mut GrayImage,
    zone: &DetectedZone,
    shields: &[CleanupShield],
    crop_box: &crate::models::BoundingBox,
    variant_w: u32,
    variant_h: u32,
) {
    for shield in shields {
        if shield.mode != ApplyMode::Applied || !shield.allows_zone(zone.zone_type) {
            continue;
        }
        let shield_on_variant = shield.bbox.denormalize(variant_w, variant_h);
        let Some(overlap) = shield_on_variant.intersection(crop_box) else {
            continue;
        };
        let local_x = overlap.x - crop_box.x;
        let local_y = overlap.y - crop_box.y;
        for y in local_y..(local_y + overlap.height).min(crop.height()) {
            for x in local_x..(local_x + overlap.width).min(crop.width()) {
                crop.put_pixel(x, y, image::Luma([255u8]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, NormalizedBox, ShieldType, VariantType, ZoneProvenance, ZoneType};
    use crate::pipeline::variant::ScoreBreakdown;
    use image::Luma;
    use tempfile::tempdir;

    fn variant_at(path: &Path, width: u32, height: u32) -> GeneratedVariant {
        GrayImage::from_pixel(width, height, Luma([10u8]))
            .save(path)
            .unwrap();
        GeneratedVariant {
            variant_type: VariantType::Grayscale,
            image_path: path.to_path_buf(),
            width,
            height,
            score: ScoreBreakdown {
                contrast: 0.5,
                edge_density: 0.5,
                noise: 0.5,
                sharpness: 0.5,
                readiness: 0.5,
            },
        }
    }

    fn zone(bbox: BoundingBox, page_w: u32, page_h: u32) -> DetectedZone {
        DetectedZone {
            zone_type: ZoneType::TotalsBox,
            bbox,
            normalized_bbox: bbox.normalize(page_w, page_h),
            confidence: 0.8,
            priority: 1,
            provenance: ZoneProvenance::Detected,
        }
    }

    fn cropper() -> ZoneCropper {
        ZoneCropper::new(ZoneConfig {
            crop_padding_px: 10,
            ..ZoneConfig::default()
        })
    }

    #[test]
    fn test_crop_dimensions_include_padding() {
        let dir = tempdir().unwrap();
        let variant = variant_at(&dir.path().join("v.png"), 600, 800);
        let zones = [zone(BoundingBox::new(100, 100, 200, 100), 600, 800)];

        let crops = cropper()
            .crop_zones(&variant, &zones, &[], &dir.path().join("crops"))
            .unwrap();
        assert_eq!(crops.len(), 1);
        assert_eq!((crops[0].width, crops[0].height), (220, 120));
    }

    #[test]
    fn test_mapping_projects_word_back_to_page() {
        let dir = tempdir().unwrap();
        // Variant is a 2x upscale of a 300x400 page.
        let variant = variant_at(&dir.path().join("v.png"), 600, 800);
        let zones = [zone(BoundingBox::new(50, 50, 100, 50), 300, 400)];

        let crops = cropper()
            .crop_zones(&variant, &zones, &[], &dir.path().join("crops"))
            .unwrap();
        let mapping = &crops[0].mapping;

        // A word at the crop origin corner of the unpadded zone.
        let word_local = BoundingBox::new(10, 10, 40, 16);
        let on_page = mapping.to_page(&word_local);
        // Crop origin on the variant is (100-10, 100-10); scale is 0.5.
        assert_eq!(on_page.x, 50);
        assert_eq!(on_page.y, 50);
        assert_eq!(on_page.width, 20);
        assert_eq!(on_page.height, 8);

        // And back again.
        let roundtrip = mapping.to_zone(&on_page).unwrap();
        assert_eq!(roundtrip, word_local);
    }

    #[test]
    fn test_applied_shield_fills_crop_region() {
        let dir = tempdir().unwrap();
        let variant = variant_at(&dir.path().join("v.png"), 600, 800);
        let zbox = BoundingBox::new(100, 100, 200, 100);
        let zones = [zone(zbox, 600, 800)];

        let mut shield = CleanupShield::auto_detected(
            ShieldType::Stamp,
            NormalizedBox::new(0.2, 0.15, 0.1, 0.05),
            0.9,
        );
        shield.mode = ApplyMode::Applied;

        let crops = cropper()
            .crop_zones(&variant, &zones, &[shield], &dir.path().join("crops"))
            .unwrap();
        let crop = image::open(&crops[0].image_path).unwrap().to_luma8();
        // Shield covers variant pixels (120..180, 120..160): crop-local
        // (30..90, 30..70) after the 10px padding offset.
        assert_eq!(crop.get_pixel(40, 40).0[0], 255);
        // Outside the shield the crop keeps the variant's dark pixels.
        assert_eq!(crop.get_pixel(5, 5).0[0], 10);
    }

    #[test]
    fn test_disabled_shield_is_ignored() {
        let dir = tempdir().unwrap();
        let variant = variant_at(&dir.path().join("v.png"), 600, 800);
        let zones = [zone(BoundingBox::new(100, 100, 200, 100), 600, 800)];

        let mut shield = CleanupShield::auto_detected(
            ShieldType::Stamp,
            NormalizedBox::new(0.2, 0.15, 0.1, 0.05),
            0.9,
        );
        shield.mode = ApplyMode::Disabled;

        let crops = cropper()
            .crop_zones(&variant, &zones, &[shield], &dir.path().join("crops"))
            .unwrap();
        let crop = image::open(&crops[0].image_path).unwrap().to_luma8();
        assert_eq!(crop.get_pixel(40, 40).0[0], 10);
    }

    #[test]
    fn test_batch_crops_all_variants() {
        let dir = tempdir().unwrap();
        let v1 = variant_at(&dir.path().join("v1.png"), 600, 800);
        let v2 = variant_at(&dir.path().join("v2.png"), 300, 400);
        let zones = [zone(BoundingBox::new(100, 100, 200, 100), 600, 800)];

        let batches = cropper()
            .crop_batch(&[v1, v2], &zones, &[], &dir.path().join("crops"))
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, 0);
        assert_eq!(batches[1].0, 1);
    }
}
