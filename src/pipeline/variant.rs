//! Preprocessing variant generation and readiness scoring.
//!
//! Each page is rendered into up to ten preprocessing variants. Every
//! variant gets a readiness score estimating how OCR-friendly it is; only
//! the top K above the configured floor move on to zone cropping. The
//! score breakdown is retained per variant so operators can see why a
//! rendition was kept or dropped.

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops::FilterType;
use image::GrayImage;
use imageproc::contrast::{adaptive_threshold, stretch_contrast};
use imageproc::filter::{filter3x3, gaussian_blur_f32, median_filter};
use imageproc::gradients::sobel_gradients;

use crate::config::VariantConfig;
use crate::error::{PipelineError, Result};
use crate::models::{CleanupShield, VariantType};

/// Per-signal readiness components, each 0.0-1.0.
#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    pub contrast: f64,
    pub edge_density: f64,
    pub noise: f64,
    pub sharpness: f64,
    /// Weighted combination of the components.
    pub readiness: f64,
}

#[derive(Debug, Clone)]
pub struct GeneratedVariant {
    pub variant_type: VariantType,
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub score: ScoreBreakdown,
}

/// Ranked variants plus generation metadata.
#[derive(Debug)]
pub struct VariantReport {
    /// Kept variants, best readiness first.
    pub variants: Vec<GeneratedVariant>,
    pub generated_count: usize,
    pub elapsed_ms: u64,
}

pub struct VariantGenerator {
    config: VariantConfig,
}

const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

impl VariantGenerator {
    pub fn new(config: VariantConfig) -> Self {
        Self { config }
    }

    /// Generate, score, and rank variants for one corrected page.
    ///
    /// Applied cleanup shields are filled before preprocessing so noise
    /// regions do not distort the readiness signals.
    pub fn generate(
        &self,
        page_path: &Path,
        shields: &[CleanupShield],
        output_dir: &Path,
    ) -> Result<VariantReport> {
        let start = Instant::now();
        let mut gray = image::open(page_path)
            .map_err(|e| {
                PipelineError::ProcessingFailed(format!(
                    "cannot decode {}: {}",
                    page_path.display(),
                    e
                ))
            })?
            .to_luma8();
        fill_shield_regions(&mut gray, shields);
        std::fs::create_dir_all(output_dir)?;

        let recipes: [(VariantType, fn(&VariantGenerator, &GrayImage) -> GrayImage); 9] = [
            (VariantType::Grayscale, Self::recipe_grayscale),
            (VariantType::AdaptiveThreshold, Self::recipe_adaptive_threshold),
            (VariantType::DenoiseSharpen, Self::recipe_denoise_sharpen),
            (VariantType::ContrastBoost, Self::recipe_contrast_boost),
            (VariantType::Upscale, Self::recipe_upscale),
            (VariantType::DeskewTouchup, Self::recipe_deskew_touchup),
            (VariantType::GrayscaleContrast, Self::recipe_grayscale_contrast),
            (VariantType::GrayscaleThreshold, Self::recipe_grayscale_threshold),
            (VariantType::DenoiseContrast, Self::recipe_denoise_contrast),
        ];

        let mut generated = Vec::new();
        for (variant_type, recipe) in recipes {
            let rendered = recipe(self, &gray);
            let score = self.score(&rendered);
            let path = output_dir.join(format!("{}.png", variant_type.as_str()));
            if let Err(e) = rendered.save(&path) {
                // One failed variant never sinks the document.
                tracing::warn!(variant = variant_type.as_str(), error = %e, "variant save failed");
                continue;
            }
            generated.push(GeneratedVariant {
                variant_type,
                image_path: path,
                width: rendered.width(),
                height: rendered.height(),
                score,
            });
        }

        let generated_count = generated.len();
        generated.sort_by(|a, b| b.score.readiness.total_cmp(&a.score.readiness));
        generated.retain(|v| v.score.readiness >= self.config.min_readiness);
        generated.truncate(self.config.keep_top_k);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.time_budget_ms {
            tracing::warn!(
                elapsed_ms,
                budget_ms = self.config.time_budget_ms,
                "variant generation exceeded its time budget"
            );
        }
        tracing::debug!(
            generated = generated_count,
            kept = generated.len(),
            elapsed_ms,
            "variants generated"
        );

        Ok(VariantReport {
            variants: generated,
            generated_count,
            elapsed_ms,
        })
    }

    fn recipe_grayscale(&self, gray: &GrayImage) -> GrayImage {
        gray.clone()
    }

    fn recipe_adaptive_threshold(&self, gray: &GrayImage) -> GrayImage {
        adaptive_threshold(gray, 12)
    }

    fn recipe_denoise_sharpen(&self, gray: &GrayImage) -> GrayImage {
        let denoised = median_filter(gray, 1, 1);
        filter3x3(&denoised, &SHARPEN_KERNEL)
    }

    fn recipe_contrast_boost(&self, gray: &GrayImage) -> GrayImage {
        let (lo, hi) = percentile_bounds(gray, 0.02, 0.98);
        stretch_contrast(gray, lo, hi, 0, 255)
    }

    fn recipe_upscale(&self, gray: &GrayImage) -> GrayImage {
        let w = (gray.width() as f64 * self.config.upscale_factor) as u32;
        let h = (gray.height() as f64 * self.config.upscale_factor) as u32;
        image::imageops::resize(gray, w.max(1), h.max(1), FilterType::CatmullRom)
    }

    /// Smooths the interpolation artifacts left behind by deskew rotation.
    fn recipe_deskew_touchup(&self, gray: &GrayImage) -> GrayImage {
        let smoothed = gaussian_blur_f32(gray, 0.7);
        filter3x3(&smoothed, &SHARPEN_KERNEL)
    }

    fn recipe_grayscale_contrast(&self, gray: &GrayImage) -> GrayImage {
        let (lo, hi) = percentile_bounds(gray, 0.05, 0.95);
        stretch_contrast(gray, lo, hi, 0, 255)
    }

    fn recipe_grayscale_threshold(&self, gray: &GrayImage) -> GrayImage {
        let (lo, hi) = percentile_bounds(gray, 0.02, 0.98);
        let stretched = stretch_contrast(gray, lo, hi, 0, 255);
        adaptive_threshold(&stretched, 20)
    }

    fn recipe_denoise_contrast(&self, gray: &GrayImage) -> GrayImage {
        let denoised = median_filter(gray, 1, 1);
        let (lo, hi) = percentile_bounds(&denoised, 0.02, 0.98);
        stretch_contrast(&denoised, lo, hi, 0, 255)
    }

    /// Readiness score with configurable weights.
    pub fn score(&self, img: &GrayImage) -> ScoreBreakdown {
        let (p5, p95) = percentile_bounds(img, 0.05, 0.95);
        let contrast = (p95.saturating_sub(p5)) as f64 / 255.0;

        let gradients = sobel_gradients(img);
        let total = (img.width() as f64) * (img.height() as f64);
        let mut edge_pixels = 0u64;
        let mut gradient_sum = 0.0f64;
        for p in gradients.pixels() {
            let magnitude = p.0[0] as f64;
            gradient_sum += magnitude;
            if magnitude > 120.0 {
                edge_pixels += 1;
            }
        }
        let edge_density = (edge_pixels as f64 / total * 10.0).min(1.0);
        let sharpness = (gradient_sum / total / 300.0).min(1.0);

        // Noise estimate: residual against a median-filtered copy. Clean
        // scans have small residuals; salt-and-pepper noise inflates them.
        let denoised = median_filter(img, 1, 1);
        let mut residual = 0.0f64;
        for (a, b) in img.pixels().zip(denoised.pixels()) {
            residual += (a.0[0] as f64 - b.0[0] as f64).abs();
        }
        let noise_estimate = residual / total;
        let noise = 1.0 / (1.0 + noise_estimate / 4.0);

        let w = &self.config.weights;
        let readiness = (w.contrast * contrast
            + w.edge_density * edge_density
            + w.noise * noise
            + w.sharpness * sharpness)
            / w.total();

        ScoreBreakdown {
            contrast,
            edge_density,
            noise,
            sharpness,
            readiness,
        }
    }
}

/// Fill Applied shield regions with paper white so they drop out of both
/// scoring and OCR.
fn fill_shield_regions(gray: &mut GrayImage, shields: &[CleanupShield]) {
    let (w, h) = (gray.width(), gray.height());
    for shield in shields {
        if shield.mode != crate::models::ApplyMode::Applied {
            continue;
        }
        let bbox = shield.bbox.denormalize(w, h).clamped(w, h);
        for y in bbox.y..bbox.bottom() {
            for x in bbox.x..bbox.right() {
                gray.put_pixel(x, y, image::Luma([255u8]));
            }
        }
    }
}

/// Pixel values at the given cumulative-histogram percentiles.
fn percentile_bounds(img: &GrayImage, lo: f64, hi: f64) -> (u8, u8) {
    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return (0, 255);
    }
    let lo_target = (total as f64 * lo) as u64;
    let hi_target = (total as f64 * hi) as u64;
    let mut cumulative = 0u64;
    let mut lo_value = 0u8;
    let mut hi_value = 255u8;
    let mut lo_found = false;
    for (value, count) in histogram.iter().enumerate() {
        cumulative += count;
        if !lo_found && cumulative >= lo_target {
            lo_value = value as u8;
            lo_found = true;
        }
        if cumulative >= hi_target {
            hi_value = value as u8;
            break;
        }
    }
    if hi_value <= lo_value {
        hi_value = lo_value.saturating_add(1);
    }
    (lo_value, hi_value)
}
